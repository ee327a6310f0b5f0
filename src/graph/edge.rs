//! Directed relations between program elements

use super::key::NodeKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of relation an edge carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    ControlFlow,
    DataFlow,
    AstChild,
    TaintFlowHop,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 4] = [
        EdgeKind::ControlFlow,
        EdgeKind::DataFlow,
        EdgeKind::AstChild,
        EdgeKind::TaintFlowHop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ControlFlow => "control-flow",
            Self::DataFlow => "data-flow",
            Self::AstChild => "ast-child",
            Self::TaintFlowHop => "taint-flow-hop",
        }
    }

    /// Relations derived from the structural graph, as opposed to overlays.
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::TaintFlowHop)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed edge between two node keys.
///
/// The derived ordering (source, target, kind, path, order) is the
/// serialization order of a fused graph's edge list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: NodeKey,
    pub target: NodeKey,
    pub kind: EdgeKind,
    /// Taint path ordinal within the unit, for taint-flow hops
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<u32>,
    /// Position among ordered siblings (AST child order, hop index)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
}

impl GraphEdge {
    pub fn new(source: NodeKey, target: NodeKey, kind: EdgeKind) -> Self {
        Self {
            source,
            target,
            kind,
            path: None,
            order: None,
        }
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_path(mut self, path: u32) -> Self {
        self.path = Some(path);
        self
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }
}

impl fmt::Display for GraphEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} [{}", self.source, self.target, self.kind)?;
        if let Some(path) = self.path {
            write!(f, " path={}", path)?;
        }
        if let Some(order) = self.order {
            write!(f, " order={}", order)?;
        }
        f.write_str("]")
    }
}
