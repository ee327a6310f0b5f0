//! Analyzer adapters
//!
//! One adapter per external tool. Each runs its tool as a subprocess
//! against a source unit and normalizes the tool-native output into
//! [`AnalyzerRecord`]s, so fusion only ever branches on record kind.

mod cpg;
mod pattern;
mod process;
mod scripted;
mod taint;
mod traits;
mod types;

pub use cpg::{parse_cpg_graphml, JoernAdapter};
pub use pattern::{parse_semgrep_json, SemgrepAdapter};
pub use process::{excerpt, query_version, Deadline, ProcessOutput, ToolCommand, ToolFailure, Workspace};
pub use scripted::ScriptedAdapter;
pub use taint::{parse_taint_sarif, CodeQlAdapter};
pub use traits::{AnalyzerAdapter, UNKNOWN_VERSION};
pub use types::{attr, AdapterOutput, AnalyzerRecord, RecordKind, Span, ToolId, ToolReport, ToolStatus};

use std::sync::Arc;

/// The adapters for the three real tools.
pub fn default_adapters() -> Vec<Arc<dyn AnalyzerAdapter>> {
    vec![
        Arc::new(JoernAdapter::new()),
        Arc::new(CodeQlAdapter::new()),
        Arc::new(SemgrepAdapter::new()),
    ]
}
