//! Normalized analyzer output
//!
//! Every tool adapter converts its native output into `AnalyzerRecord`s.
//! The record carries a `kind` discriminator so fusion branches on what a
//! finding *is*, never on which tool produced it.

use crate::graph::{EdgeKind, NodeKind, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known keys in `AnalyzerRecord::attributes`.
pub mod attr {
    pub const SEVERITY: &str = "severity";
    pub const MESSAGE: &str = "message";
    pub const RULE_ID: &str = "rule_id";
    pub const CWE: &str = "cwe";
    pub const CODE: &str = "code";
    pub const TAINT_SOURCE: &str = "taint.source";
    pub const TAINT_SINK: &str = "taint.sink";
}

/// Identity of one of the three external analyzers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolId {
    /// Code-property-graph generator (Joern)
    Cpg,
    /// Dataflow / taint-path checker (CodeQL)
    Taint,
    /// Pattern-matching linter (Semgrep)
    Pattern,
}

impl ToolId {
    pub const ALL: [ToolId; 3] = [ToolId::Cpg, ToolId::Taint, ToolId::Pattern];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpg => "cpg",
            Self::Taint => "taint",
            Self::Pattern => "pattern",
        }
    }

    /// Executable used when the configuration does not name one.
    pub fn default_executable(&self) -> &'static str {
        match self {
            Self::Cpg => "joern",
            Self::Taint => "codeql",
            Self::Pattern => "semgrep",
        }
    }

    /// Per-tool timeout used when the configuration does not set one.
    pub fn default_timeout_secs(&self) -> u64 {
        match self {
            Self::Cpg => 600,
            Self::Taint => 900,
            Self::Pattern => 300,
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one adapter invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolStatus {
    Ok,
    ToolNotInstalled,
    ToolTimeout,
    ToolCrashed,
    ParseError,
    /// Not part of the enabled tool set for this run
    Disabled,
}

impl ToolStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Enabled but did not contribute.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Ok | Self::Disabled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ToolNotInstalled => "tool-not-installed",
            Self::ToolTimeout => "tool-timeout",
            Self::ToolCrashed => "tool-crashed",
            Self::ParseError => "parse-error",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A location reported by a tool. Lines are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Span {
    /// A span covering `start..=end`. An inverted range collapses to `start`.
    pub fn new(file: impl Into<String>, start_line: u32, end_line: u32) -> Self {
        Self {
            file: file.into(),
            start_line,
            end_line: end_line.max(start_line),
            column: None,
        }
    }

    /// A single-line span.
    pub fn line(file: impl Into<String>, line: u32) -> Self {
        Self::new(file, line, line)
    }

    pub fn with_column(mut self, column: u32) -> Self {
        self.column = Some(column);
        self
    }

    pub fn overlaps(&self, start: u32, end: u32) -> bool {
        self.start_line <= end && start <= self.end_line
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start_line == self.end_line {
            write!(f, "{}:{}", self.file, self.start_line)
        } else {
            write!(f, "{}:{}-{}", self.file, self.start_line, self.end_line)
        }
    }
}

/// What a record describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RecordKind {
    /// A program element from the structural graph.
    CpgNode {
        node_kind: NodeKind,
        /// Qualified name when the element is itself a declaration
        #[serde(default, skip_serializing_if = "Option::is_none")]
        declaration: Option<String>,
        /// Structural annotations such as `control:if` or `call:executeQuery`
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        labels: Vec<String>,
    },
    /// A structural relation between `spans[0]` and `spans[1]`.
    CpgEdge {
        relation: EdgeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order: Option<u32>,
    },
    /// A source-to-sink flow; `spans` are the ordered hops.
    TaintPath,
    /// A rule match at `span`.
    PatternMatch,
}

impl RecordKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CpgNode { .. } => "cpg-node",
            Self::CpgEdge { .. } => "cpg-edge",
            Self::TaintPath => "taint-path",
            Self::PatternMatch => "pattern-match",
        }
    }
}

/// One tool-native finding, normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerRecord {
    pub tool: ToolId,
    #[serde(flatten)]
    pub kind: RecordKind,
    /// Primary location
    pub span: Span,
    /// Ordered locations for multi-point findings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<Span>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl AnalyzerRecord {
    pub fn new(tool: ToolId, kind: RecordKind, span: Span) -> Self {
        Self {
            tool,
            kind,
            span,
            spans: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn cpg_node(span: Span, node_kind: NodeKind) -> Self {
        Self::new(
            ToolId::Cpg,
            RecordKind::CpgNode {
                node_kind,
                declaration: None,
                labels: Vec::new(),
            },
            span,
        )
    }

    /// A declaration node (method, type) with its qualified name.
    pub fn cpg_declaration(span: Span, name: impl Into<String>) -> Self {
        Self::new(
            ToolId::Cpg,
            RecordKind::CpgNode {
                node_kind: NodeKind::Declaration,
                declaration: Some(name.into()),
                labels: Vec::new(),
            },
            span,
        )
    }

    pub fn cpg_edge(from: Span, to: Span, relation: EdgeKind, order: Option<u32>) -> Self {
        let mut record = Self::new(ToolId::Cpg, RecordKind::CpgEdge { relation, order }, from.clone());
        record.spans = vec![from, to];
        record
    }

    /// A taint path over `hops`. Panics never; an empty hop list yields a
    /// record anchored at `anchor` with no hops.
    pub fn taint_path(anchor: Span, hops: Vec<Span>) -> Self {
        let span = hops.first().cloned().unwrap_or(anchor);
        let mut record = Self::new(ToolId::Taint, RecordKind::TaintPath, span);
        record.spans = hops;
        record
    }

    pub fn pattern_match(span: Span, rule_id: impl Into<String>) -> Self {
        Self::new(ToolId::Pattern, RecordKind::PatternMatch, span).with_attribute(attr::RULE_ID, rule_id)
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_severity(self, severity: Severity) -> Self {
        self.with_attribute(attr::SEVERITY, severity.as_str())
    }

    pub fn with_message(self, message: impl Into<String>) -> Self {
        self.with_attribute(attr::MESSAGE, message)
    }

    pub fn with_rule_id(self, rule_id: impl Into<String>) -> Self {
        self.with_attribute(attr::RULE_ID, rule_id)
    }

    /// Add a structural label. No-op for non-node records.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        if let RecordKind::CpgNode { labels, .. } = &mut self.kind {
            labels.push(label.into());
        }
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn severity(&self) -> Option<Severity> {
        self.attribute(attr::SEVERITY).and_then(Severity::parse)
    }

    pub fn rule_id(&self) -> Option<&str> {
        self.attribute(attr::RULE_ID)
    }

    pub fn message(&self) -> Option<&str> {
        self.attribute(attr::MESSAGE)
    }

    /// The locations fusion resolves: the hop list when present, else the primary span.
    pub fn locations(&self) -> &[Span] {
        if self.spans.is_empty() {
            std::slice::from_ref(&self.span)
        } else {
            &self.spans
        }
    }
}

/// What an adapter hands back: records plus how the invocation went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterOutput {
    pub records: Vec<AnalyzerRecord>,
    pub status: ToolStatus,
    /// Human-readable cause for a non-ok status
    pub detail: Option<String>,
}

impl AdapterOutput {
    pub fn ok(records: Vec<AnalyzerRecord>) -> Self {
        Self {
            records,
            status: ToolStatus::Ok,
            detail: None,
        }
    }

    /// A degraded outcome. Records are always empty for a failed tool.
    pub fn failed(status: ToolStatus, detail: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            status,
            detail: Some(detail.into()),
        }
    }
}

/// Per-tool provenance entry stored in fused graph metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolReport {
    pub tool: ToolId,
    pub status: ToolStatus,
    pub version: String,
    pub records: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ToolReport {
    pub fn disabled(tool: ToolId) -> Self {
        Self {
            tool,
            status: ToolStatus::Disabled,
            version: String::new(),
            records: 0,
            detail: None,
        }
    }

    pub fn from_output(tool: ToolId, version: impl Into<String>, output: &AdapterOutput) -> Self {
        Self {
            tool,
            status: output.status,
            version: version.into(),
            records: output.records.len(),
            detail: output.detail.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_collapses_inverted_range() {
        let span = Span::new("A.java", 12, 3);
        assert_eq!(span.start_line, 12);
        assert_eq!(span.end_line, 12);
    }

    #[test]
    fn taint_path_anchors_on_first_hop() {
        let record = AnalyzerRecord::taint_path(
            Span::line("A.java", 1),
            vec![Span::line("A.java", 10), Span::line("A.java", 14)],
        );
        assert_eq!(record.span.start_line, 10);
        assert_eq!(record.locations().len(), 2);
    }

    #[test]
    fn single_location_records_resolve_their_primary_span() {
        let record = AnalyzerRecord::pattern_match(Span::line("A.java", 12), "CWE-89");
        assert_eq!(record.locations(), &[Span::line("A.java", 12)]);
        assert_eq!(record.rule_id(), Some("CWE-89"));
    }

    #[test]
    fn severity_attribute_round_trips_through_parse() {
        let record = AnalyzerRecord::pattern_match(Span::line("A.java", 1), "r").with_severity(Severity::High);
        assert_eq!(record.severity(), Some(Severity::High));
    }

    #[test]
    fn labels_only_attach_to_node_records() {
        let node = AnalyzerRecord::cpg_node(Span::line("A.java", 3), NodeKind::Statement).with_label("control:if");
        assert!(matches!(&node.kind, RecordKind::CpgNode { labels, .. } if labels == &vec!["control:if".to_string()]));

        let pattern = AnalyzerRecord::pattern_match(Span::line("A.java", 3), "r").with_label("ignored");
        assert_eq!(pattern.kind, RecordKind::PatternMatch);
    }

    #[test]
    fn record_kind_serializes_with_discriminator() {
        let record = AnalyzerRecord::pattern_match(Span::line("A.java", 3), "r");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "pattern-match");
        assert_eq!(json["tool"], "pattern");
    }

    #[test]
    fn failure_statuses_exclude_disabled() {
        assert!(ToolStatus::ToolTimeout.is_failure());
        assert!(!ToolStatus::Disabled.is_failure());
        assert!(!ToolStatus::Ok.is_failure());
    }
}
