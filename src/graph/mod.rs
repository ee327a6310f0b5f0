//! Fused graph data structures and fusion

mod edge;
mod fused;
mod fuser;
mod key;
mod listing;
mod node;

pub use edge::{EdgeKind, GraphEdge};
pub use fused::{Degradation, FusedGraph, FusionWarning, GraphMetadata, TaintPath};
pub use fuser::{build_skeleton, fuse, needs_skeleton, FusionContext, GraphFuser, SNIPPET_LINES};
pub use key::{NodeKey, FILE_SCOPE};
pub use listing::{listing_fingerprint, render_listing};
pub use node::{GraphNode, Label, LabelSource, NodeKind, Severity, TAINTED};

#[cfg(test)]
pub(crate) use fuser::ok_reports;
