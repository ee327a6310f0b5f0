//! Source units: the code fragments the pipeline analyzes

use serde::{Deserialize, Serialize};

/// One file of a source unit. Paths are relative, `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub text: String,
}

/// Which side of a fix a unit's text represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Vulnerable code as flagged
    #[default]
    Before,
    /// Code after a candidate fix was applied
    After,
}

/// Optional narrowing of a unit to one method or line range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UnitScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
}

impl UnitScope {
    pub fn method(name: impl Into<String>) -> Self {
        Self {
            method: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn lines(start_line: u32, end_line: u32) -> Self {
        Self {
            start_line: Some(start_line),
            end_line: Some(end_line.max(start_line)),
            ..Self::default()
        }
    }

    /// Explicit line range, if one was given.
    pub fn line_range(&self) -> Option<(u32, u32)> {
        match (self.start_line, self.end_line) {
            (None, None) => None,
            (start, end) => Some((start.unwrap_or(1), end.unwrap_or(u32::MAX))),
        }
    }
}

/// A code fragment under analysis.
///
/// Immutable once built: fields are private and there are no mutators,
/// so a unit's text cannot change during a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUnit {
    id: String,
    files: Vec<SourceFile>,
    #[serde(default)]
    variant: Variant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<UnitScope>,
}

impl SourceUnit {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            files: Vec::new(),
            variant: Variant::Before,
            scope: None,
        }
    }

    /// Add a file. A later file with the same path replaces the earlier one.
    pub fn with_file(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        let path = normalize_path(&path.into());
        let text = text.into();
        match self.files.iter_mut().find(|f| f.path == path) {
            Some(existing) => existing.text = text,
            None => self.files.push(SourceFile { path, text }),
        }
        self
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_scope(mut self, scope: UnitScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn file(&self, path: &str) -> Option<&SourceFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn scope(&self) -> Option<&UnitScope> {
        self.scope.as_ref()
    }

    /// The only file's path, for units with exactly one file.
    pub fn sole_file(&self) -> Option<&str> {
        match self.files.as_slice() {
            [only] => Some(&only.path),
            _ => None,
        }
    }

    /// Lines `start..=end` of `file`, at most `max_lines` of them.
    pub fn snippet(&self, file: &str, start: u32, end: u32, max_lines: usize) -> String {
        let Some(source) = self.file(file) else {
            return String::new();
        };
        let skip = start.saturating_sub(1) as usize;
        let wanted = (end.max(start) - start) as usize + 1;
        let mut lines: Vec<&str> = source.text.lines().skip(skip).take(wanted.min(max_lines)).collect();
        if wanted > max_lines && !lines.is_empty() {
            lines.push("...");
        }
        lines.join("\n")
    }
}

/// Relative, `/`-separated, no `.` or `..` components.
pub(crate) fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|c| !c.is_empty() && *c != "." && *c != "..")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_normalized() {
        let unit = SourceUnit::new("u").with_file("./src\\..\\Main.java", "x");
        assert_eq!(unit.files()[0].path, "src/Main.java");
        assert_eq!(unit.sole_file(), Some("src/Main.java"));
    }

    #[test]
    fn same_path_replaces_text() {
        let unit = SourceUnit::new("u").with_file("A.java", "old").with_file("A.java", "new");
        assert_eq!(unit.files().len(), 1);
        assert_eq!(unit.file("A.java").unwrap().text, "new");
    }

    #[test]
    fn snippet_clips_long_ranges() {
        let text = (1..=20).map(|i| format!("line{}", i)).collect::<Vec<_>>().join("\n");
        let unit = SourceUnit::new("u").with_file("A.java", text);
        assert_eq!(unit.snippet("A.java", 3, 4, 12), "line3\nline4");
        assert_eq!(unit.snippet("A.java", 1, 20, 2), "line1\nline2\n...");
        assert_eq!(unit.snippet("B.java", 1, 2, 12), "");
    }

    #[test]
    fn scope_line_range_fills_open_ends() {
        let scope = UnitScope {
            start_line: Some(10),
            ..UnitScope::default()
        };
        assert_eq!(scope.line_range(), Some((10, u32::MAX)));
        assert_eq!(UnitScope::method("find").line_range(), None);
    }

    #[test]
    fn units_deserialize_from_json() {
        let unit: SourceUnit = serde_json::from_str(
            r#"{"id":"CVE-1","files":[{"path":"A.java","text":"class A {}"}],"scope":{"method":"run"}}"#,
        )
        .unwrap();
        assert_eq!(unit.id(), "CVE-1");
        assert_eq!(unit.variant(), Variant::Before);
        assert_eq!(unit.scope().unwrap().method.as_deref(), Some("run"));
    }
}
