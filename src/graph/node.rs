//! Program-element nodes and their annotation labels

use super::key::NodeKey;
use crate::adapter::ToolId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Granularity of a program element.
///
/// Variant order is merge precedence: when records of different kinds
/// resolve to one key the node keeps the coarsest kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Expression,
    Statement,
    Declaration,
}

impl NodeKind {
    pub fn merge(self, other: NodeKind) -> NodeKind {
        self.max(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expression => "expression",
            Self::Statement => "statement",
            Self::Declaration => "declaration",
        }
    }
}

/// Finding severity, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse the severity vocabularies the analyzers use
    /// (`HIGH`, `error`, `WARNING`, `note`, ...).
    pub fn parse(s: &str) -> Option<Severity> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" | "error" => Some(Self::High),
            "medium" | "moderate" | "warning" => Some(Self::Medium),
            "low" | "note" => Some(Self::Low),
            "info" | "informational" | "none" => Some(Self::Info),
            _ => None,
        }
    }

    /// Map a CVSS-style numeric score.
    pub fn from_score(score: f64) -> Severity {
        if score >= 9.0 {
            Self::Critical
        } else if score >= 7.0 {
            Self::High
        } else if score >= 4.0 {
            Self::Medium
        } else if score > 0.0 {
            Self::Low
        } else {
            Self::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which kind of evidence produced a label.
///
/// Variant order is ranking priority, ascending: taint-flow outranks
/// pattern-match outranks structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelSource {
    Structural,
    Pattern,
    Taint,
}

impl LabelSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Pattern => "pattern",
            Self::Taint => "taint",
        }
    }
}

/// Name of the label attached to every node a taint path traverses.
pub const TAINTED: &str = "tainted";

/// An annotation on a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub source: LabelSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Label {
    pub fn structural(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: LabelSource::Structural,
            severity: None,
            rule_id: None,
            message: None,
        }
    }

    /// A pattern-match label, named by its rule id.
    pub fn pattern(rule_id: impl Into<String>, severity: Option<Severity>) -> Self {
        let rule_id = rule_id.into();
        Self {
            name: rule_id.clone(),
            source: LabelSource::Pattern,
            severity,
            rule_id: Some(rule_id),
            message: None,
        }
    }

    pub fn tainted(rule_id: Option<String>, severity: Option<Severity>) -> Self {
        Self {
            name: TAINTED.to_string(),
            source: LabelSource::Taint,
            severity,
            rule_id,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_tainted(&self) -> bool {
        self.source == LabelSource::Taint && self.name == TAINTED
    }
}

/// One program element in a fused graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeKey,
    pub kind: NodeKind,
    /// Source text of the key's line range, possibly clipped
    pub snippet: String,
    #[serde(default)]
    pub labels: BTreeSet<Label>,
    /// Tools whose records resolved to this node
    #[serde(default)]
    pub provenance: BTreeSet<ToolId>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Created for an annotation with no structural node behind it
    #[serde(default)]
    pub synthetic: bool,
    /// Data-flow edges whose endpoints both resolved to this node
    #[serde(default)]
    pub internal_data_flow: usize,
}

impl GraphNode {
    pub fn new(id: NodeKey, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            snippet: String::new(),
            labels: BTreeSet::new(),
            provenance: BTreeSet::new(),
            attributes: BTreeMap::new(),
            synthetic: false,
            internal_data_flow: 0,
        }
    }

    /// Minimal node standing in for a missing structural one.
    pub fn synthetic(id: NodeKey) -> Self {
        let kind = if id.is_file_scope() {
            NodeKind::Statement
        } else {
            NodeKind::Declaration
        };
        Self {
            synthetic: true,
            ..Self::new(id, kind)
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    /// A node with at least one label is a finding.
    pub fn is_finding(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn is_tainted(&self) -> bool {
        self.labels.iter().any(Label::is_tainted)
    }

    /// Highest severity across all labels. Tool priority never overrides it.
    pub fn max_severity(&self) -> Option<Severity> {
        self.labels.iter().filter_map(|l| l.severity).max()
    }

    /// Highest-priority evidence source among the labels.
    pub fn top_source(&self) -> Option<LabelSource> {
        self.labels.iter().map(|l| l.source).max()
    }

    pub fn labels_from(&self, source: LabelSource) -> impl Iterator<Item = &Label> {
        self.labels.iter().filter(move |l| l.source == source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> NodeKey {
        NodeKey::new("A.java", 10, 15, "A.run")
    }

    #[test]
    fn kind_merge_keeps_coarsest() {
        assert_eq!(NodeKind::Expression.merge(NodeKind::Declaration), NodeKind::Declaration);
        assert_eq!(NodeKind::Statement.merge(NodeKind::Expression), NodeKind::Statement);
    }

    #[test]
    fn severity_parses_tool_vocabularies() {
        assert_eq!(Severity::parse("ERROR"), Some(Severity::High));
        assert_eq!(Severity::parse("warning"), Some(Severity::Medium));
        assert_eq!(Severity::parse("note"), Some(Severity::Low));
        assert_eq!(Severity::parse(" Critical "), Some(Severity::Critical));
        assert_eq!(Severity::parse("bogus"), None);
    }

    #[test]
    fn severity_from_score_uses_cvss_bands() {
        assert_eq!(Severity::from_score(9.8), Severity::Critical);
        assert_eq!(Severity::from_score(8.8), Severity::High);
        assert_eq!(Severity::from_score(5.0), Severity::Medium);
        assert_eq!(Severity::from_score(0.1), Severity::Low);
        assert_eq!(Severity::from_score(0.0), Severity::Info);
    }

    #[test]
    fn max_severity_ignores_source_priority() {
        let mut node = GraphNode::new(key(), NodeKind::Declaration);
        node.labels.insert(Label::tainted(None, Some(Severity::Medium)));
        node.labels.insert(Label::pattern("CWE-89", Some(Severity::High)));
        assert_eq!(node.max_severity(), Some(Severity::High));
        assert_eq!(node.top_source(), Some(LabelSource::Taint));
    }

    #[test]
    fn labels_form_a_set() {
        let mut node = GraphNode::new(key(), NodeKind::Declaration);
        assert!(node.labels.insert(Label::pattern("CWE-89", Some(Severity::High))));
        assert!(!node.labels.insert(Label::pattern("CWE-89", Some(Severity::High))));
        assert_eq!(node.labels.len(), 1);
    }

    #[test]
    fn synthetic_nodes_are_flagged() {
        let node = GraphNode::synthetic(NodeKey::file_scope("A.java", 3, 3));
        assert!(node.synthetic);
        assert_eq!(node.kind, NodeKind::Statement);
        assert!(!node.is_finding());
    }
}
