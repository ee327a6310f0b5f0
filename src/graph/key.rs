//! Canonical node identity derived from source location

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scope name used when no declaration encloses a span.
pub const FILE_SCOPE: &str = "<file-scope>";

/// Identity of one program element in a fused graph.
///
/// Ordering is lexicographic over (file, start line, end line, scope), which
/// is also the order nodes and edges serialize in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    /// Declaration-qualified name, or [`FILE_SCOPE`]
    pub scope: String,
}

impl NodeKey {
    pub fn new(file: impl Into<String>, start_line: u32, end_line: u32, scope: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            start_line,
            end_line: end_line.max(start_line),
            scope: scope.into(),
        }
    }

    /// Key for a span no declaration encloses.
    pub fn file_scope(file: impl Into<String>, start_line: u32, end_line: u32) -> Self {
        Self::new(file, start_line, end_line, FILE_SCOPE)
    }

    pub fn is_file_scope(&self) -> bool {
        self.scope == FILE_SCOPE
    }

    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    /// Last segment of the qualified name (`UserDao.find` -> `find`).
    pub fn short_scope(&self) -> &str {
        self.scope.rsplit('.').next().unwrap_or(&self.scope)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}#{}", self.file, self.start_line, self.end_line, self.scope)
    }
}
