//! Graph fusion: resolved records in, one attributed graph out
//!
//! Records are processed by kind, never by tool: structural nodes first,
//! then structural edges, then taint paths, then pattern matches. Every
//! location goes through the identity resolver, so evidence from different
//! tools about the same declaration lands on the same node.

use super::edge::{EdgeKind, GraphEdge};
use super::fused::{Degradation, FusedGraph, FusionWarning, GraphMetadata, TaintPath};
use super::key::NodeKey;
use super::node::{GraphNode, Label, NodeKind};
use crate::adapter::{attr, AnalyzerRecord, RecordKind, Span, ToolReport, ToolStatus};
use crate::resolve::{DeclarationIndex, IdentityResolver};
use crate::unit::SourceUnit;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Longest snippet stored on a node.
pub const SNIPPET_LINES: usize = 12;

/// Label used for pattern matches whose tool reported no rule id.
const UNNAMED_RULE: &str = "pattern";

/// What fusion needs besides the records themselves.
#[derive(Debug, Clone)]
pub struct FusionContext<'a> {
    pub unit: &'a SourceUnit,
    /// One report per known tool
    pub tools: Vec<ToolReport>,
    pub fused_at: DateTime<Utc>,
}

impl<'a> FusionContext<'a> {
    pub fn new(unit: &'a SourceUnit, tools: Vec<ToolReport>) -> Self {
        Self {
            unit,
            tools,
            fused_at: Utc::now(),
        }
    }

    pub fn at(mut self, fused_at: DateTime<Utc>) -> Self {
        self.fused_at = fused_at;
        self
    }

    fn sorted_tools(&self) -> Vec<ToolReport> {
        let mut tools = self.tools.clone();
        tools.sort_by_key(|r| r.tool);
        tools
    }
}

/// Edge identity for deduplication; the value is the smallest order seen.
type EdgeSlot = (NodeKey, NodeKey, EdgeKind, Option<u32>);

/// Accumulates one fused graph.
pub struct GraphFuser<'a> {
    resolver: &'a IdentityResolver,
    unit: &'a SourceUnit,
    nodes: BTreeMap<NodeKey, GraphNode>,
    edges: BTreeMap<EdgeSlot, Option<u32>>,
    warnings: Vec<FusionWarning>,
    ambiguous_spans: BTreeSet<Span>,
    folded_edges: usize,
    taint_paths: Vec<TaintPath>,
}

impl<'a> GraphFuser<'a> {
    pub fn new(resolver: &'a IdentityResolver, unit: &'a SourceUnit) -> Self {
        Self {
            resolver,
            unit,
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            warnings: Vec::new(),
            ambiguous_spans: BTreeSet::new(),
            folded_edges: 0,
            taint_paths: Vec::new(),
        }
    }

    /// Fuse `records` into a graph. Consumes the fuser.
    pub fn fuse(mut self, records: &[AnalyzerRecord], context: &FusionContext<'_>) -> FusedGraph {
        let records = self.apply_scope(records);

        for record in &records {
            if let RecordKind::CpgNode {
                node_kind,
                declaration,
                labels,
            } = &record.kind
            {
                self.add_structural_node(record, *node_kind, declaration.as_deref(), labels);
            }
        }
        for record in &records {
            if let RecordKind::CpgEdge { relation, order } = &record.kind {
                self.add_structural_edge(record, *relation, *order);
            }
        }
        let mut path = 0u32;
        for record in &records {
            if record.kind == RecordKind::TaintPath {
                self.add_taint_path(record, path);
                path += 1;
            }
        }
        for record in &records {
            if record.kind == RecordKind::PatternMatch {
                self.add_pattern_match(record);
            }
        }

        let tools = context.sorted_tools();
        let degradation = if tools.iter().any(|r| r.status.is_failure()) {
            Degradation::Partial
        } else {
            Degradation::None
        };
        self.finish(context, tools, degradation)
    }

    /// Drop structural nodes outside the unit's scope hint.
    fn apply_scope<'r>(&mut self, records: &'r [AnalyzerRecord]) -> Vec<&'r AnalyzerRecord> {
        let Some(ranges) = scope_ranges(self.unit, self.resolver.index()) else {
            return records.iter().collect();
        };
        let (kept, dropped): (Vec<&AnalyzerRecord>, Vec<&AnalyzerRecord>) = records.iter().partition(|r| {
            !matches!(r.kind, RecordKind::CpgNode { .. })
                || ranges.iter().any(|(file, start, end)| {
                    file.as_deref().map_or(true, |f| f == r.span.file) && r.span.overlaps(*start, *end)
                })
        });
        if !dropped.is_empty() {
            debug!(unit_id = %self.unit.id(), dropped = dropped.len(), "structural records outside scope");
            self.warnings.push(FusionWarning::OutOfScope { dropped: dropped.len() });
        }
        kept
    }

    fn resolve(&mut self, span: &Span) -> NodeKey {
        let resolution = self.resolver.resolve_span(span);
        if let Some(ambiguity) = resolution.ambiguity {
            if self.ambiguous_spans.insert(span.clone()) {
                self.warnings.push(FusionWarning::AmbiguousResolution {
                    file: span.file.clone(),
                    start_line: span.start_line,
                    end_line: span.end_line,
                    chosen: ambiguity.chosen,
                    candidates: ambiguity.candidates,
                });
            }
        }
        resolution.key
    }

    /// The node at `key`, created as a synthetic stand-in when absent.
    fn node_or_synthetic(&mut self, key: NodeKey) -> &mut GraphNode {
        let unit = self.unit;
        self.nodes.entry(key).or_insert_with_key(|key| {
            GraphNode::synthetic(key.clone()).with_snippet(unit.snippet(
                &key.file,
                key.start_line,
                key.end_line,
                SNIPPET_LINES,
            ))
        })
    }

    fn add_structural_node(
        &mut self,
        record: &AnalyzerRecord,
        kind: NodeKind,
        declaration: Option<&str>,
        labels: &[String],
    ) {
        let key = self.resolve(&record.span);
        let unit = self.unit;
        let node = self.nodes.entry(key).or_insert_with_key(|key| {
            GraphNode::new(key.clone(), kind).with_snippet(unit.snippet(
                &key.file,
                key.start_line,
                key.end_line,
                SNIPPET_LINES,
            ))
        });
        node.kind = node.kind.merge(kind);
        node.provenance.insert(record.tool);
        node.labels.extend(labels.iter().map(Label::structural));
        for (name, value) in &record.attributes {
            node.attributes.insert(name.clone(), value.clone());
        }
        if let Some(name) = declaration {
            node.attributes.insert("declaration".to_string(), name.to_string());
        }
    }

    fn add_structural_edge(&mut self, record: &AnalyzerRecord, relation: EdgeKind, order: Option<u32>) {
        let [from, to] = record.spans.as_slice() else {
            debug!(spans = record.spans.len(), "structural edge without two endpoints");
            return;
        };
        let source = self.resolve(from);
        let target = self.resolve(to);
        if source == target {
            self.folded_edges += 1;
            if relation == EdgeKind::DataFlow {
                if let Some(node) = self.nodes.get_mut(&source) {
                    node.internal_data_flow += 1;
                }
            }
            return;
        }
        self.insert_edge((source, target, relation, None), order);
    }

    fn add_taint_path(&mut self, record: &AnalyzerRecord, path: u32) {
        let severity = record.severity();
        let rule_id = record.rule_id().map(str::to_string);
        let mut label = Label::tainted(rule_id, severity);
        if let Some(message) = record.message() {
            label = label.with_message(message);
        }

        let hops: Vec<NodeKey> = record.locations().iter().map(|span| self.resolve(span)).collect();
        for key in &hops {
            let node = self.node_or_synthetic(key.clone());
            node.labels.insert(label.clone());
            node.provenance.insert(record.tool);
        }

        // self-loops are kept: consecutive hops inside one declaration
        for (order, pair) in hops.windows(2).enumerate() {
            self.insert_edge(
                (pair[0].clone(), pair[1].clone(), EdgeKind::TaintFlowHop, Some(path)),
                Some(order as u32),
            );
        }

        let locations = record.locations();
        let endpoint = |name: &str, span: Option<&Span>| {
            record
                .attribute(name)
                .map(str::to_string)
                .or_else(|| span.map(Span::to_string))
                .unwrap_or_default()
        };
        self.taint_paths.push(TaintPath {
            path,
            source: endpoint(attr::TAINT_SOURCE, locations.first()),
            sink: endpoint(attr::TAINT_SINK, locations.last()),
            hops,
            rule_id: record.rule_id().map(str::to_string),
            severity,
        });
    }

    fn add_pattern_match(&mut self, record: &AnalyzerRecord) {
        let key = self.resolve(&record.span);
        let mut label = Label::pattern(record.rule_id().unwrap_or(UNNAMED_RULE), record.severity());
        if let Some(message) = record.message() {
            label = label.with_message(message);
        }
        let node = self.node_or_synthetic(key);
        node.labels.insert(label);
        node.provenance.insert(record.tool);
        if let Some(cwe) = record.attribute(attr::CWE) {
            node.attributes.insert(attr::CWE.to_string(), cwe.to_string());
        }
    }

    fn insert_edge(&mut self, slot: EdgeSlot, order: Option<u32>) {
        self.edges
            .entry(slot)
            .and_modify(|existing| {
                *existing = match (*existing, order) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
            })
            .or_insert(order);
    }

    /// Validate edges against the final node set and assemble the graph.
    fn finish(mut self, context: &FusionContext<'_>, tools: Vec<ToolReport>, degradation: Degradation) -> FusedGraph {
        let mut edges = Vec::with_capacity(self.edges.len());
        let mut dropped = 0;
        for ((source, target, kind, path), order) in std::mem::take(&mut self.edges) {
            if !self.nodes.contains_key(&source) || !self.nodes.contains_key(&target) {
                warn!(source = %source, target = %target, kind = %kind, "dropping dangling edge");
                self.warnings.push(FusionWarning::DanglingEdge { source, target, kind });
                dropped += 1;
                continue;
            }
            edges.push(GraphEdge {
                source,
                target,
                kind,
                path,
                order,
            });
        }

        debug!(
            unit_id = %self.unit.id(),
            nodes = self.nodes.len(),
            edges = edges.len(),
            dropped,
            folded = self.folded_edges,
            "graph fused"
        );

        FusedGraph {
            nodes: self.nodes,
            edges,
            metadata: GraphMetadata {
                unit_id: self.unit.id().to_string(),
                tools,
                fused_at: context.fused_at,
                degradation,
                declaration_source: self.resolver.index().source(),
                warnings: self.warnings,
                dropped_edges: dropped,
                folded_edges: self.folded_edges,
                taint_paths: self.taint_paths,
            },
        }
    }
}

/// Fuse one unit's records with a resolver over `index`.
pub fn fuse(records: &[AnalyzerRecord], index: DeclarationIndex, context: &FusionContext<'_>) -> FusedGraph {
    let resolver = IdentityResolver::new(index);
    GraphFuser::new(&resolver, context.unit).fuse(records, context)
}

/// Structural-only graph for a unit no tool could analyze.
///
/// Nodes are the declarations of `index` (normally a source scan); each
/// nested declaration hangs off its parent by an ast-child edge.
pub fn build_skeleton(index: &DeclarationIndex, context: &FusionContext<'_>) -> FusedGraph {
    let unit = context.unit;
    let key_of = |d: &crate::resolve::Declaration| NodeKey::new(&d.file, d.start_line, d.end_line, &d.name);

    let mut nodes = BTreeMap::new();
    let mut edges = BTreeSet::new();
    for decl in index.iter() {
        let key = key_of(decl);
        let snippet = unit.snippet(&decl.file, decl.start_line, decl.end_line, SNIPPET_LINES);
        nodes.insert(key.clone(), GraphNode::new(key.clone(), NodeKind::Declaration).with_snippet(snippet));
        if let Some(parent) = index.parent_of(decl) {
            edges.insert(GraphEdge::new(key_of(parent), key, EdgeKind::AstChild).with_order(decl.order as u32));
        }
    }
    debug!(unit_id = %unit.id(), nodes = nodes.len(), "built structural skeleton");

    FusedGraph {
        nodes,
        edges: edges.into_iter().collect(),
        metadata: GraphMetadata {
            unit_id: unit.id().to_string(),
            tools: context.sorted_tools(),
            fused_at: context.fused_at,
            degradation: Degradation::SkeletonOnly,
            declaration_source: index.source(),
            warnings: Vec::new(),
            dropped_edges: 0,
            folded_edges: 0,
            taint_paths: Vec::new(),
        },
    }
}

/// True when no enabled tool produced usable output.
pub fn needs_skeleton(tools: &[ToolReport]) -> bool {
    !tools.iter().any(|r| r.status == ToolStatus::Ok)
}

/// Line ranges a scope hint admits, or `None` for no filtering.
///
/// An explicit line range applies to every file. A method name admits
/// the ranges of every declaration so named; an unknown method filters
/// nothing.
fn scope_ranges(unit: &SourceUnit, index: &DeclarationIndex) -> Option<Vec<(Option<String>, u32, u32)>> {
    let scope = unit.scope()?;
    if let Some((start, end)) = scope.line_range() {
        return Some(vec![(None, start, end)]);
    }
    let method = scope.method.as_deref()?;
    let ranges: Vec<_> = index
        .named(method)
        .map(|d| (Some(d.file.clone()), d.start_line, d.end_line))
        .collect();
    if ranges.is_empty() {
        debug!(unit_id = %unit.id(), method, "scope method not declared; keeping all records");
        return None;
    }
    Some(ranges)
}

/// Reports for a tool set where every tool succeeded with the given versions.
#[cfg(test)]
pub(crate) fn ok_reports(tools: &[crate::adapter::ToolId]) -> Vec<ToolReport> {
    tools
        .iter()
        .map(|t| ToolReport {
            tool: *t,
            status: ToolStatus::Ok,
            version: "test".into(),
            records: 0,
            detail: None,
        })
        .collect()
}
