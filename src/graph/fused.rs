//! The fused graph artifact

use super::edge::{EdgeKind, GraphEdge};
use super::key::NodeKey;
use super::node::{GraphNode, Severity};
use crate::adapter::{ToolId, ToolReport};
use crate::resolve::DeclarationSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How much of the analysis a graph reflects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Degradation {
    /// Every enabled tool contributed
    #[default]
    None,
    /// At least one enabled tool failed; the rest contributed
    Partial,
    /// No tool contributed; nodes come from a best-effort source scan
    SkeletonOnly,
}

impl Degradation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Partial => "partial",
            Self::SkeletonOnly => "skeleton-only",
        }
    }
}

/// Non-fatal anomaly recorded during fusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FusionWarning {
    /// An edge referenced a key with no node and was dropped.
    DanglingEdge {
        source: NodeKey,
        target: NodeKey,
        kind: EdgeKind,
    },
    /// A span straddled sibling declarations; the first-declared one was chosen.
    AmbiguousResolution {
        file: String,
        start_line: u32,
        end_line: u32,
        chosen: String,
        candidates: Vec<String>,
    },
    /// Structural records outside the unit's scope hint were discarded.
    OutOfScope { dropped: usize },
}

impl std::fmt::Display for FusionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DanglingEdge { source, target, kind } => {
                write!(f, "dangling {} edge {} -> {}", kind, source, target)
            }
            Self::AmbiguousResolution {
                file,
                start_line,
                end_line,
                chosen,
                candidates,
            } => write!(
                f,
                "span {}:{}-{} straddles {}; chose {}",
                file,
                start_line,
                end_line,
                candidates.join(", "),
                chosen
            ),
            Self::OutOfScope { dropped } => write!(f, "{} structural records outside unit scope", dropped),
        }
    }
}

/// One taint path as its analyzer reported it.
///
/// Endpoints are kept per path: several paths may end on the same node,
/// and a single-location path has no hop edges at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintPath {
    /// Index among the unit's taint records, matching `GraphEdge::path`
    pub path: u32,
    /// Node of every reported location, in flow order
    pub hops: Vec<NodeKey>,
    pub source: String,
    pub sink: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

/// Provenance and diagnostics for one fused graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub unit_id: String,
    /// One report per known tool, in tool order
    pub tools: Vec<ToolReport>,
    pub fused_at: DateTime<Utc>,
    #[serde(default)]
    pub degradation: Degradation,
    pub declaration_source: DeclarationSource,
    #[serde(default)]
    pub warnings: Vec<FusionWarning>,
    /// Edges dropped by endpoint validation
    #[serde(default)]
    pub dropped_edges: usize,
    /// Structural edges that collapsed onto a single node
    #[serde(default)]
    pub folded_edges: usize,
    #[serde(default)]
    pub taint_paths: Vec<TaintPath>,
}

impl GraphMetadata {
    pub fn tool(&self, tool: ToolId) -> Option<&ToolReport> {
        self.tools.iter().find(|r| r.tool == tool)
    }
}

/// Nodes, edges and provenance for one source unit under one tool set.
///
/// Built once and never mutated afterwards; a different tool set yields a
/// different graph under a different cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusedGraph {
    #[serde(with = "node_list")]
    pub nodes: BTreeMap<NodeKey, GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub metadata: GraphMetadata,
}

impl FusedGraph {
    pub fn node(&self, key: &NodeKey) -> Option<&GraphNode> {
        self.nodes.get(key)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Nodes carrying at least one label.
    pub fn findings(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values().filter(|n| n.is_finding())
    }

    pub fn edges_of(&self, kind: EdgeKind) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }

    /// Edge counts for every kind, zeros included.
    pub fn edge_counts(&self) -> BTreeMap<EdgeKind, usize> {
        let mut counts: BTreeMap<EdgeKind, usize> = EdgeKind::ALL.iter().map(|k| (*k, 0)).collect();
        for edge in &self.edges {
            *counts.entry(edge.kind).or_default() += 1;
        }
        counts
    }

    pub fn synthetic_count(&self) -> usize {
        self.nodes.values().filter(|n| n.synthetic).count()
    }

    /// Tools that were enabled for this build.
    pub fn tool_set(&self) -> Vec<ToolId> {
        self.metadata
            .tools
            .iter()
            .filter(|r| r.status != crate::adapter::ToolStatus::Disabled)
            .map(|r| r.tool)
            .collect()
    }

    pub fn failed_tools(&self) -> Vec<ToolId> {
        self.metadata
            .tools
            .iter()
            .filter(|r| r.status.is_failure())
            .map(|r| r.tool)
            .collect()
    }

    pub fn is_degraded(&self) -> bool {
        self.metadata.degradation != Degradation::None
    }

    /// Pretty JSON in node-link form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// BLAKE3 digest of the graph's canonical JSON, excluding the fusion
    /// timestamp. Equal fingerprints mean equal nodes, edges and provenance.
    pub fn content_fingerprint(&self) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Some(meta) = value.get_mut("metadata").and_then(serde_json::Value::as_object_mut) {
            meta.remove("fused_at");
        }
        let bytes = serde_json::to_vec(&value)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    /// Structural invariants a persisted graph must satisfy: every edge
    /// endpoint exists and the edge list is strictly sorted.
    pub fn check_integrity(&self) -> Result<(), String> {
        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.source) || !self.nodes.contains_key(&edge.target) {
                return Err(format!("edge {} references a missing node", edge));
            }
        }
        if self.edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err("edge list is not in canonical order".to_string());
        }
        if self.nodes.iter().any(|(k, n)| k != &n.id) {
            return Err("node ids disagree with node keys".to_string());
        }
        for trace in &self.metadata.taint_paths {
            if let Some(missing) = trace.hops.iter().find(|k| !self.nodes.contains_key(k)) {
                return Err(format!("taint path {} references missing node {}", trace.path, missing));
            }
        }
        Ok(())
    }
}

/// Nodes serialize as a list (node-link form) and load back into a map.
mod node_list {
    use super::{GraphNode, NodeKey};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(nodes: &BTreeMap<NodeKey, GraphNode>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(nodes.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeMap<NodeKey, GraphNode>, D::Error> {
        let list = Vec::<GraphNode>::deserialize(deserializer)?;
        let expected = list.len();
        let nodes: BTreeMap<NodeKey, GraphNode> = list.into_iter().map(|n| (n.id.clone(), n)).collect();
        if nodes.len() != expected {
            return Err(serde::de::Error::custom("duplicate node id in node list"));
        }
        Ok(nodes)
    }
}
