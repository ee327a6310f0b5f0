//! Plain-text rendering of digests

use super::summarize::{DetailLevel, Digest, Finding, TaintPathSummary};
use std::fmt::Write;

const SNIPPET_PREVIEW_LINES: usize = 3;

/// Render `digest` as text at the requested detail level.
///
/// The summary block (tool availability, counts, truncation) appears at
/// every level so a degraded analysis is visible even when no findings
/// survive the budget.
pub fn render(digest: &Digest, detail: DetailLevel) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== security graph digest: {} ==", digest.unit_id);
    if digest.is_degraded() {
        let _ = writeln!(out, "analysis: degraded ({})", digest.degradation.as_str());
    } else {
        out.push_str("analysis: complete\n");
    }

    let tools: Vec<String> = digest
        .tools
        .iter()
        .map(|r| format!("{} {}", r.tool, r.status))
        .collect();
    let _ = writeln!(out, "tools: {}", tools.join(", "));

    let counts = &digest.counts;
    let by_kind: Vec<String> = counts
        .edges_by_kind
        .iter()
        .map(|(kind, n)| format!("{} {}", kind, n))
        .collect();
    let _ = writeln!(
        out,
        "graph: {} nodes ({} synthetic), {} edges ({})",
        counts.nodes,
        counts.synthetic_nodes,
        counts.edges,
        by_kind.join(", ")
    );

    let t = &digest.truncation;
    let _ = write!(out, "findings: {} of {}", t.returned_findings, t.total_findings);
    if t.omitted_findings > 0 {
        let _ = write!(out, " ({} lower-ranked omitted)", t.omitted_findings);
    }
    out.push('\n');

    if !digest.findings.is_empty() {
        out.push_str("\nfindings:\n");
        for (i, finding) in digest.findings.iter().enumerate() {
            render_finding(&mut out, i + 1, finding, detail);
        }
    }

    if detail >= DetailLevel::Medium && !digest.taint_paths.is_empty() {
        out.push_str("\ntaint paths:\n");
        for (i, path) in digest.taint_paths.iter().enumerate() {
            render_path(&mut out, i + 1, path, detail);
        }
        if t.omitted_paths > 0 {
            let _ = writeln!(out, "  ({} more paths omitted)", t.omitted_paths);
        }
    }
    out
}

fn render_finding(out: &mut String, rank: usize, finding: &Finding, detail: DetailLevel) {
    let severity = finding.severity.map_or("unrated", |s| s.as_str());
    let node = &finding.node;
    let _ = write!(
        out,
        "{}. [{}] {}:{}-{} in {}",
        rank, severity, node.file, node.start_line, node.end_line, node.scope
    );
    if finding.tainted {
        out.push_str(" tainted");
    }
    if !finding.rule_ids.is_empty() {
        let _ = write!(out, " {}", finding.rule_ids.join(", "));
    }
    if let Some(cwe) = &finding.cwe {
        let _ = write!(out, " ({})", cwe);
    }
    out.push('\n');

    if detail >= DetailLevel::Medium {
        for message in &finding.messages {
            let _ = writeln!(out, "   {}", message.lines().next().unwrap_or_default());
        }
    }
    if detail == DetailLevel::High {
        if !finding.structural.is_empty() {
            let _ = writeln!(out, "   structure: {}", finding.structural.join(", "));
        }
        if finding.internal_data_flow > 0 {
            let _ = writeln!(out, "   data flow: {} internal edges", finding.internal_data_flow);
        }
        for line in finding.snippet.lines().take(SNIPPET_PREVIEW_LINES) {
            let _ = writeln!(out, "   | {}", line);
        }
    }
}

fn render_path(out: &mut String, rank: usize, path: &TaintPathSummary, detail: DetailLevel) {
    let severity = path.severity.map_or("unrated", |s| s.as_str());
    let _ = writeln!(
        out,
        "{}. [{}] {} -> {} ({} hops)",
        rank,
        severity,
        path.source,
        path.sink,
        path.hops.len().saturating_sub(1)
    );
    if detail == DetailLevel::High && path.hops.len() > 2 {
        let steps: Vec<&str> = path.hops[1..path.hops.len() - 1]
            .iter()
            .map(|k| k.scope.as_str())
            .collect();
        let _ = writeln!(out, "   via {}", steps.join(" -> "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ToolId, ToolReport, ToolStatus};
    use crate::digest::summarize::{AggregateCounts, Truncation};
    use crate::graph::{Degradation, EdgeKind, LabelSource, NodeKey, Severity};
    use std::collections::BTreeMap;

    fn digest() -> Digest {
        let a = NodeKey::new("A.java", 2, 9, "A.read");
        let b = NodeKey::new("A.java", 10, 20, "A.query");
        Digest {
            unit_id: "u7".into(),
            degradation: Degradation::Partial,
            tools: vec![
                ToolReport::disabled(ToolId::Cpg),
                ToolReport {
                    tool: ToolId::Taint,
                    status: ToolStatus::ToolTimeout,
                    version: "2.15".into(),
                    records: 0,
                    detail: None,
                },
            ],
            counts: AggregateCounts {
                nodes: 2,
                edges: 2,
                edges_by_kind: EdgeKind::ALL.iter().map(|k| (*k, 0)).collect::<BTreeMap<_, _>>(),
                findings: 3,
                synthetic_nodes: 2,
                taint_paths: 1,
                dropped_edges: 0,
                warnings: 0,
            },
            findings: vec![Finding {
                node: b.clone(),
                severity: Some(Severity::High),
                source: LabelSource::Pattern,
                tainted: false,
                rule_ids: vec!["sqli".into()],
                structural: vec!["call:executeQuery".into(), "param:id".into(), "var:q".into()],
                internal_data_flow: 3,
                messages: vec!["query built from input".into()],
                cwe: Some("CWE-89".into()),
                synthetic: true,
                snippet: "void query() {\n  run(q);\n  log();\n  done();\n}".into(),
            }],
            taint_paths: vec![TaintPathSummary {
                path: 0,
                hops: vec![a.clone(), NodeKey::new("A.java", 30, 40, "A.mid"), b],
                source: "A.java:3".into(),
                sink: "A.java:12".into(),
                severity: Some(Severity::High),
            }],
            truncation: Truncation {
                total_findings: 3,
                returned_findings: 1,
                omitted_findings: 2,
                total_paths: 1,
                omitted_paths: 0,
            },
        }
    }

    #[test]
    fn low_detail_keeps_summary_and_one_line_findings() {
        let text = render(&digest(), DetailLevel::Low);
        assert!(text.contains("analysis: degraded (partial)"));
        assert!(text.contains("tools: cpg disabled, taint tool-timeout"));
        assert!(text.contains("findings: 1 of 3 (2 lower-ranked omitted)"));
        assert!(text.contains("1. [high] A.java:10-20 in A.query sqli (CWE-89)"));
        assert!(!text.contains("query built from input"));
        assert!(!text.contains("taint paths:"));
    }

    #[test]
    fn medium_adds_messages_and_path_endpoints() {
        let text = render(&digest(), DetailLevel::Medium);
        assert!(text.contains("   query built from input"));
        assert!(text.contains("1. [high] A.java:3 -> A.java:12 (2 hops)"));
        assert!(!text.contains("via A.mid"));
        assert!(!text.contains("structure:"));
        assert!(!text.contains("data flow:"));
    }

    #[test]
    fn single_location_path_renders_without_steps() {
        let mut digest = digest();
        let only = NodeKey::new("A.java", 10, 20, "A.query");
        digest.taint_paths = vec![TaintPathSummary {
            path: 0,
            hops: vec![only],
            source: "A.java:12".into(),
            sink: "A.java:12".into(),
            severity: Some(Severity::Medium),
        }];
        let text = render(&digest, DetailLevel::High);
        assert!(text.contains("1. [medium] A.java:12 -> A.java:12 (0 hops)"));
        assert!(!text.contains("via"));
    }

    #[test]
    fn high_adds_steps_structure_and_snippet() {
        let text = render(&digest(), DetailLevel::High);
        assert!(text.contains("via A.mid"));
        assert!(text.contains("structure: call:executeQuery, param:id, var:q"));
        assert!(text.contains("   data flow: 3 internal edges"));
        assert!(text.contains("   |   log();"));
        assert!(!text.contains("done();"));
    }
}
