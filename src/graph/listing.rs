//! Human-readable findings listing, the textual sibling of a persisted graph
//!
//! The listing carries the graph's content fingerprint on its second line so
//! a loader can tell whether the two files came from the same build.

use super::fused::FusedGraph;
use super::node::GraphNode;
use std::fmt::Write;

const FINGERPRINT_PREFIX: &str = "fingerprint: ";

/// Render `graph` as a plain-text listing stamped with `fingerprint`.
pub fn render_listing(graph: &FusedGraph, fingerprint: &str) -> String {
    let meta = &graph.metadata;
    let mut out = String::new();
    let _ = writeln!(out, "# findings for unit {}", meta.unit_id);
    let _ = writeln!(out, "{}{}", FINGERPRINT_PREFIX, fingerprint);
    let _ = writeln!(out, "degradation: {}", meta.degradation.as_str());
    for report in &meta.tools {
        let _ = write!(out, "tool {}: {}", report.tool, report.status);
        if !report.version.is_empty() {
            let _ = write!(out, " ({})", report.version);
        }
        let _ = writeln!(out, ", {} records", report.records);
    }
    let _ = writeln!(out, "nodes: {}  edges: {}", graph.node_count(), graph.edge_count());
    for (kind, count) in graph.edge_counts() {
        let _ = writeln!(out, "  {}: {}", kind, count);
    }

    out.push('\n');
    let findings: Vec<&GraphNode> = graph.findings().collect();
    if findings.is_empty() {
        out.push_str("no findings\n");
    }
    for node in findings {
        let _ = write!(out, "{}", node.id);
        if node.synthetic {
            out.push_str(" (synthetic)");
        }
        out.push('\n');
        for label in &node.labels {
            let _ = write!(out, "  [{}] {}", label.source.as_str(), label.name);
            if let Some(severity) = label.severity {
                let _ = write!(out, " severity={}", severity);
            }
            if let Some(message) = &label.message {
                let _ = write!(out, " :: {}", message.lines().next().unwrap_or_default());
            }
            out.push('\n');
        }
    }

    if !meta.warnings.is_empty() {
        out.push('\n');
        for warning in &meta.warnings {
            let _ = writeln!(out, "warning: {}", warning);
        }
    }
    out
}

/// The fingerprint a listing was stamped with.
pub fn listing_fingerprint(listing: &str) -> Option<&str> {
    listing
        .lines()
        .take(2)
        .find_map(|line| line.strip_prefix(FINGERPRINT_PREFIX))
        .map(str::trim)
}
