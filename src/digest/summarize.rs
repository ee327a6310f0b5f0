//! Bounded, ranked summaries of fused graphs

use crate::adapter::{attr, ToolReport};
use crate::graph::{Degradation, EdgeKind, FusedGraph, GraphNode, LabelSource, NodeKey, Severity};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How many items a digest may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemBudget {
    /// Findings kept after ranking
    pub max_items: usize,
    /// Taint paths kept after ranking
    pub max_paths: usize,
}

impl Default for ItemBudget {
    fn default() -> Self {
        Self {
            max_items: 10,
            max_paths: 5,
        }
    }
}

impl ItemBudget {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items,
            ..Self::default()
        }
    }

    pub fn with_paths(mut self, max_paths: usize) -> Self {
        self.max_paths = max_paths;
        self
    }
}

/// Verbosity of a rendered digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    /// Counts and one line per finding
    Low,
    /// Adds messages and taint path endpoints
    Medium,
    /// Adds intermediate taint steps, structural labels and snippets
    #[default]
    High,
}

impl DetailLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetailLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown detail level: {}", other)),
        }
    }
}

/// One flagged node, flattened for consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub node: NodeKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Strongest evidence behind the finding
    pub source: LabelSource,
    pub tainted: bool,
    /// Pattern rule ids and taint query ids, deduplicated
    pub rule_ids: Vec<String>,
    /// Structural labels such as `call:executeQuery` or `param:id`
    pub structural: Vec<String>,
    /// Data-flow edges folded inside the node
    #[serde(default)]
    pub internal_data_flow: usize,
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwe: Option<String>,
    pub synthetic: bool,
    pub snippet: String,
}

impl Finding {
    fn from_node(node: &GraphNode) -> Option<Self> {
        let source = node.top_source()?;
        let mut rule_ids = Vec::new();
        let mut structural = Vec::new();
        let mut messages = Vec::new();
        for label in &node.labels {
            if label.source == LabelSource::Structural {
                structural.push(label.name.clone());
            }
            if let Some(rule) = &label.rule_id {
                if !rule_ids.contains(rule) {
                    rule_ids.push(rule.clone());
                }
            }
            if let Some(message) = &label.message {
                if !messages.contains(message) {
                    messages.push(message.clone());
                }
            }
        }
        Some(Self {
            node: node.id.clone(),
            severity: node.max_severity(),
            source,
            tainted: node.is_tainted(),
            rule_ids,
            structural,
            internal_data_flow: node.internal_data_flow,
            messages,
            cwe: node.attributes.get(attr::CWE).cloned(),
            synthetic: node.synthetic,
            snippet: node.snippet.clone(),
        })
    }

    /// Severity descending, then evidence priority, then line ascending.
    pub fn rank(&self, other: &Self) -> Ordering {
        other
            .severity
            .cmp(&self.severity)
            .then_with(|| other.source.cmp(&self.source))
            .then_with(|| self.node.start_line.cmp(&other.node.start_line))
            .then_with(|| self.node.cmp(&other.node))
    }
}

/// A taint path with its own endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintPathSummary {
    pub path: u32,
    /// Nodes visited in hop order; repeats mean hops inside one node, and
    /// a single-location path has exactly one
    pub hops: Vec<NodeKey>,
    pub source: String,
    pub sink: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

/// Counts reported regardless of budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCounts {
    pub nodes: usize,
    pub edges: usize,
    pub edges_by_kind: BTreeMap<EdgeKind, usize>,
    pub findings: usize,
    pub synthetic_nodes: usize,
    pub taint_paths: usize,
    pub dropped_edges: usize,
    pub warnings: usize,
}

/// What the budget cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Truncation {
    pub total_findings: usize,
    pub returned_findings: usize,
    pub omitted_findings: usize,
    pub total_paths: usize,
    pub omitted_paths: usize,
}

impl Truncation {
    pub fn is_truncated(&self) -> bool {
        self.omitted_findings > 0 || self.omitted_paths > 0
    }
}

/// Bounded summary of one fused graph for downstream prompt assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    pub unit_id: String,
    pub degradation: Degradation,
    /// Per-tool availability, always complete
    pub tools: Vec<ToolReport>,
    pub counts: AggregateCounts,
    pub findings: Vec<Finding>,
    pub taint_paths: Vec<TaintPathSummary>,
    pub truncation: Truncation,
}

impl Digest {
    pub fn is_degraded(&self) -> bool {
        self.degradation != Degradation::None
    }
}

/// Ranked, truncated digest of `graph`.
pub fn summarize(graph: &FusedGraph, budget: ItemBudget) -> Digest {
    let mut findings: Vec<Finding> = graph.findings().filter_map(Finding::from_node).collect();
    findings.sort_by(Finding::rank);
    let total_findings = findings.len();
    findings.truncate(budget.max_items);

    let mut paths = taint_paths(graph);
    let total_paths = paths.len();
    paths.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.hops.len().cmp(&b.hops.len()))
            .then_with(|| a.path.cmp(&b.path))
    });
    paths.truncate(budget.max_paths);

    let counts = AggregateCounts {
        nodes: graph.node_count(),
        edges: graph.edge_count(),
        edges_by_kind: graph.edge_counts(),
        findings: total_findings,
        synthetic_nodes: graph.synthetic_count(),
        taint_paths: total_paths,
        dropped_edges: graph.metadata.dropped_edges,
        warnings: graph.metadata.warnings.len(),
    };
    let truncation = Truncation {
        total_findings,
        returned_findings: findings.len(),
        omitted_findings: total_findings - findings.len(),
        total_paths,
        omitted_paths: total_paths - paths.len(),
    };

    Digest {
        unit_id: graph.metadata.unit_id.clone(),
        degradation: graph.metadata.degradation,
        tools: graph.metadata.tools.clone(),
        counts,
        findings,
        taint_paths: paths,
        truncation,
    }
}

/// One summary per recorded taint path, in path order.
fn taint_paths(graph: &FusedGraph) -> Vec<TaintPathSummary> {
    graph
        .metadata
        .taint_paths
        .iter()
        .map(|trace| TaintPathSummary {
            path: trace.path,
            hops: trace.hops.clone(),
            source: trace.source.clone(),
            sink: trace.sink.clone(),
            severity: trace.severity,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AnalyzerRecord, Span, ToolId};
    use crate::graph::{fuse, ok_reports, FusionContext, NodeKind};
    use crate::resolve::DeclarationIndex;
    use crate::unit::SourceUnit;

    const SOURCE: &str = "\
class Svc {
    void a() {
        x();
    }
    void b() {
        y();
    }
    void c() {
        z();
    }
    void d() {
        w();
    }
}
";

    fn graph() -> FusedGraph {
        let unit = SourceUnit::new("svc").with_file("Svc.java", SOURCE);
        let records = vec![
            AnalyzerRecord::cpg_node(Span::line("Svc.java", 12), NodeKind::Expression).with_label("call:w"),
            AnalyzerRecord::pattern_match(Span::line("Svc.java", 3), "weak-hash").with_severity(Severity::Medium),
            AnalyzerRecord::pattern_match(Span::line("Svc.java", 6), "sqli").with_severity(Severity::High),
            AnalyzerRecord::taint_path(
                Span::line("Svc.java", 9),
                vec![Span::line("Svc.java", 3), Span::line("Svc.java", 9)],
            )
            .with_severity(Severity::High),
        ];
        let context = FusionContext::new(&unit, ok_reports(&ToolId::ALL));
        fuse(&records, DeclarationIndex::build(&unit, &records), &context)
    }

    fn scopes(digest: &Digest) -> Vec<&str> {
        digest.findings.iter().map(|f| f.node.short_scope()).collect()
    }

    #[test]
    fn findings_rank_by_severity_then_evidence_then_line() {
        let digest = summarize(&graph(), ItemBudget::default());
        // a, b and c are all high; tainted a and c outrank pattern-only b
        assert_eq!(scopes(&digest), vec!["a", "c", "b", "d"]);
        assert_eq!(digest.findings[3].source, LabelSource::Structural);
        assert_eq!(digest.findings[3].severity, None);
        assert!(!digest.truncation.is_truncated());
    }

    #[test]
    fn truncation_keeps_top_ranked_and_counts_the_rest() {
        let full = summarize(&graph(), ItemBudget::default());
        let digest = summarize(&graph(), ItemBudget::new(2));

        assert_eq!(digest.findings, full.findings[..2].to_vec());
        assert_eq!(digest.truncation.total_findings, 4);
        assert_eq!(digest.truncation.omitted_findings, 2);
        assert_eq!(digest.counts.findings, 4);
        assert_eq!(digest.counts.nodes, full.counts.nodes);
        assert_eq!(digest.tools.len(), 3);
    }

    #[test]
    fn taint_paths_rebuild_hop_order() {
        let digest = summarize(&graph(), ItemBudget::default());
        assert_eq!(digest.taint_paths.len(), 1);
        let path = &digest.taint_paths[0];
        let hops: Vec<&str> = path.hops.iter().map(|k| k.short_scope()).collect();
        assert_eq!(hops, vec!["a", "c"]);
        assert_eq!(path.source, "Svc.java:3");
        assert_eq!(path.sink, "Svc.java:9");
        assert_eq!(path.severity, Some(Severity::High));

        let none = summarize(&graph(), ItemBudget::default().with_paths(0));
        assert!(none.taint_paths.is_empty());
        assert_eq!(none.truncation.omitted_paths, 1);
    }

    #[test]
    fn single_location_path_is_counted_and_ranked() {
        let unit = SourceUnit::new("svc").with_file("Svc.java", SOURCE);
        let records = vec![
            AnalyzerRecord::taint_path(
                Span::line("Svc.java", 3),
                vec![Span::line("Svc.java", 3), Span::line("Svc.java", 9)],
            )
            .with_severity(Severity::Medium),
            AnalyzerRecord::taint_path(Span::line("Svc.java", 12), vec![]).with_severity(Severity::Critical),
        ];
        let context = FusionContext::new(&unit, ok_reports(&[ToolId::Taint]));
        let graph = fuse(&records, DeclarationIndex::build(&unit, &records), &context);

        let digest = summarize(&graph, ItemBudget::default());
        assert_eq!(digest.counts.taint_paths, 2);
        let first = &digest.taint_paths[0];
        assert_eq!(first.path, 1);
        assert_eq!(first.hops.len(), 1);
        assert_eq!(first.hops[0].short_scope(), "d");
        assert_eq!(first.sink, "Svc.java:12");

        let cut = summarize(&graph, ItemBudget::default().with_paths(1));
        assert_eq!(cut.truncation.omitted_paths, 1);
        assert_eq!(cut.taint_paths[0].path, 1);
    }

    #[test]
    fn detail_level_parses() {
        assert_eq!("Medium".parse::<DetailLevel>(), Ok(DetailLevel::Medium));
        assert!("verbose".parse::<DetailLevel>().is_err());
    }
}
