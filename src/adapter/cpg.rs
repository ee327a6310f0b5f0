//! CPG adapter: Joern code property graphs via GraphML export
//!
//! Runs `joern-parse` over the materialized unit, exports the whole graph
//! with `joern-export --format graphml`, and turns labelled vertices into
//! `cpg-node` records and AST/CFG/CDG/REACHING_DEF edges into `cpg-edge`
//! records.

use super::process::{query_version, Deadline, ToolCommand, ToolFailure, Workspace};
use super::traits::{AnalyzerAdapter, UNKNOWN_VERSION};
use super::types::{attr, AdapterOutput, AnalyzerRecord, Span, ToolId};
use crate::config::ToolConfig;
use crate::graph::{EdgeKind, NodeKind};
use crate::unit::SourceUnit;
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

const VERSION_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CODE_LEN: usize = 160;
const MAX_AST_DEPTH: usize = 64;

#[derive(Debug, Default)]
struct Element {
    id: String,
    source: String,
    target: String,
    /// Label given as an XML attribute rather than a data entry
    label_attr: Option<String>,
    props: HashMap<String, String>,
}

impl Element {
    fn from_start(e: &BytesStart<'_>) -> Self {
        let mut element = Element::default();
        for attribute in e.attributes().flatten() {
            let value = attribute
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attribute.value).into_owned());
            match attribute.key.as_ref() {
                b"id" => element.id = value,
                b"source" => element.source = value,
                b"target" => element.target = value,
                b"label" | b"labels" => element.label_attr = Some(value.trim_start_matches(':').to_string()),
                _ => {}
            }
        }
        element
    }

    fn label(&self, data_key: &str) -> &str {
        self.props
            .get(data_key)
            .or_else(|| self.props.get("label"))
            .map(String::as_str)
            .or(self.label_attr.as_deref())
            .unwrap_or("")
    }

    fn prop(&self, name: &str) -> Option<&str> {
        self.props
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty() && *v != "<empty>" && *v != "N/A")
    }

    fn line(&self, name: &str) -> Option<u32> {
        self.prop(name).and_then(|v| v.parse::<u32>().ok()).filter(|l| *l > 0)
    }
}

fn attribute_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Vertices and edges of a GraphML document, in document order.
fn read_graphml(xml: &str) -> Result<(Vec<Element>, Vec<Element>), String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut keys: HashMap<String, String> = HashMap::new();
    let mut vertices = Vec::new();
    let mut edges = Vec::new();
    let mut current: Option<(bool, Element)> = None;
    let mut data_key: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"node" => current = Some((true, Element::from_start(&e))),
                b"edge" => current = Some((false, Element::from_start(&e))),
                b"data" if current.is_some() => {
                    data_key = attribute_value(&e, b"key").map(|k| keys.get(&k).cloned().unwrap_or(k));
                    text.clear();
                }
                b"key" => register_key(&e, &mut keys),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"key" => register_key(&e, &mut keys),
                b"node" => vertices.push(Element::from_start(&e)),
                b"edge" => edges.push(Element::from_start(&e)),
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if data_key.is_some() {
                    match t.unescape() {
                        Ok(s) => text.push_str(&s),
                        Err(_) => text.push_str(&reader.decoder().decode(t.as_ref()).unwrap_or_default()),
                    }
                }
            }
            Ok(Event::CData(t)) => {
                if data_key.is_some() {
                    text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"data" => {
                    if let (Some((_, element)), Some(key)) = (current.as_mut(), data_key.take()) {
                        element.props.insert(key, text.trim().to_string());
                    }
                }
                b"node" | b"edge" => match current.take() {
                    Some((true, element)) => vertices.push(element),
                    Some((false, element)) => edges.push(element),
                    None => {}
                },
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("GraphML parse error at byte {}: {}", reader.buffer_position(), e)),
            _ => {}
        }
        buf.clear();
    }
    Ok((vertices, edges))
}

fn register_key(e: &BytesStart<'_>, keys: &mut HashMap<String, String>) {
    if let (Some(id), Some(name)) = (attribute_value(e, b"id"), attribute_value(e, b"attr.name")) {
        keys.insert(id, name);
    }
}

fn classify(label: &str) -> Option<NodeKind> {
    match label {
        "METHOD" | "TYPE_DECL" => Some(NodeKind::Declaration),
        "CALL" | "IDENTIFIER" | "LITERAL" | "FIELD_IDENTIFIER" | "METHOD_REF" | "TYPE_REF" | "UNKNOWN" => {
            Some(NodeKind::Expression)
        }
        "CONTROL_STRUCTURE" | "RETURN" | "LOCAL" | "BLOCK" | "METHOD_PARAMETER_IN" | "JUMP_TARGET" => {
            Some(NodeKind::Statement)
        }
        _ => None,
    }
}

fn relation(label: &str) -> Option<EdgeKind> {
    match label {
        "AST" => Some(EdgeKind::AstChild),
        "CFG" | "CDG" => Some(EdgeKind::ControlFlow),
        "REACHING_DEF" => Some(EdgeKind::DataFlow),
        _ => None,
    }
}

/// Structural labels for control constructs, named calls, locals and
/// parameters.
fn structural_labels(label: &str, vertex: &Element) -> Vec<String> {
    match label {
        "CONTROL_STRUCTURE" => {
            let kind = vertex.prop("CONTROL_STRUCTURE_TYPE").unwrap_or("").to_ascii_lowercase();
            match kind.as_str() {
                "if" | "switch" | "try" => vec![format!("control:{}", kind)],
                "for" | "while" | "do" => vec![format!("loop:{}", kind)],
                _ => Vec::new(),
            }
        }
        "CALL" => match vertex.prop("NAME") {
            Some(name) if !name.starts_with("<operator>") => vec![format!("call:{}", name)],
            _ => Vec::new(),
        },
        "LOCAL" => vertex.prop("NAME").map(|n| format!("var:{}", n)).into_iter().collect(),
        // the implicit receiver is not a data source
        "METHOD_PARAMETER_IN" => match vertex.prop("NAME") {
            Some(name) if name != "this" => vec![format!("param:{}", name)],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn clip(code: &str) -> String {
    if code.len() <= MAX_CODE_LEN {
        return code.to_string();
    }
    let mut end = MAX_CODE_LEN;
    while !code.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &code[..end])
}

/// Parse a Joern GraphML export into CPG records.
///
/// `resolve_file` maps a tool-reported `FILENAME` back to a unit path;
/// vertices without a file of their own inherit one from their AST
/// ancestors, then fall back to `default_file`. Vertices with no line
/// number or no file are skipped, as are edges touching them.
pub fn parse_cpg_graphml(
    xml: &str,
    resolve_file: impl Fn(&str) -> String,
    default_file: Option<&str>,
) -> Result<Vec<AnalyzerRecord>, String> {
    let (vertices, edges) = read_graphml(xml)?;
    let by_id: HashMap<&str, &Element> = vertices.iter().map(|v| (v.id.as_str(), v)).collect();
    let ast_parent: HashMap<&str, &str> = edges
        .iter()
        .filter(|e| e.label("labelE") == "AST")
        .map(|e| (e.target.as_str(), e.source.as_str()))
        .collect();

    let file_of = |id: &str| -> Option<String> {
        let mut cursor = id;
        for _ in 0..MAX_AST_DEPTH {
            let vertex = by_id.get(cursor)?;
            if let Some(file) = vertex.prop("FILENAME") {
                return Some(resolve_file(file));
            }
            cursor = *ast_parent.get(cursor)?;
        }
        None
    };

    let mut records = Vec::new();
    let mut located: HashMap<&str, Span> = HashMap::new();

    for vertex in &vertices {
        let label = vertex.label("labelV");
        let Some(kind) = classify(label) else { continue };
        if vertex.prop("IS_EXTERNAL") == Some("true") {
            continue;
        }
        let Some(line) = vertex.line("LINE_NUMBER") else { continue };
        let Some(file) = file_of(&vertex.id).or_else(|| default_file.map(str::to_string)) else {
            continue;
        };
        let end = vertex.line("LINE_NUMBER_END").unwrap_or(line);
        let mut span = Span::new(file, line, end);
        if let Some(column) = vertex.line("COLUMN_NUMBER") {
            span = span.with_column(column);
        }

        let mut record = if kind == NodeKind::Declaration {
            let name = vertex
                .prop("FULL_NAME")
                .map(|n| n.split(':').next().unwrap_or(n))
                .or_else(|| vertex.prop("NAME"))
                .unwrap_or(label);
            AnalyzerRecord::cpg_declaration(span.clone(), name)
        } else {
            AnalyzerRecord::cpg_node(span.clone(), kind)
        };
        for structural in structural_labels(label, vertex) {
            record = record.with_label(structural);
        }
        if let Some(code) = vertex.prop("CODE") {
            record = record.with_attribute(attr::CODE, clip(code));
        }
        record = record.with_attribute("cpg.label", label);
        records.push(record);
        located.insert(vertex.id.as_str(), span);
    }

    let node_records = records.len();
    for edge in &edges {
        let Some(kind) = relation(edge.label("labelE")) else { continue };
        let (Some(from), Some(to)) = (located.get(edge.source.as_str()), located.get(edge.target.as_str())) else {
            continue;
        };
        let order = match kind {
            EdgeKind::AstChild => by_id.get(edge.target.as_str()).and_then(|t| t.line("ORDER")),
            _ => None,
        };
        records.push(AnalyzerRecord::cpg_edge(from.clone(), to.clone(), kind, order));
    }

    debug!(
        vertices = vertices.len(),
        edges = edges.len(),
        node_records,
        edge_records = records.len() - node_records,
        "parsed CPG export"
    );
    Ok(records)
}

/// First GraphML/XML file under `dir`, by sorted path.
fn find_export(dir: &Path) -> Option<PathBuf> {
    let mut pending = vec![dir.to_path_buf()];
    let mut found = Vec::new();
    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if matches!(path.extension().and_then(|e| e.to_str()), Some("xml" | "graphml")) {
                found.push(path);
            }
        }
    }
    found.sort();
    found.into_iter().next()
}

/// Drives Joern (`joern-parse`, `joern-export`).
#[derive(Debug, Default)]
pub struct JoernAdapter {
    version: OnceCell<String>,
}

impl JoernAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run(&self, unit: &SourceUnit, config: &ToolConfig) -> Result<Vec<AnalyzerRecord>, ToolFailure> {
        let deadline = Deadline::after(config.timeout(ToolId::Cpg));
        let workspace =
            Workspace::materialize(unit).map_err(|e| ToolFailure::crashed(format!("workspace: {}", e)))?;
        let program = config.program(ToolId::Cpg);
        let cpg_bin = workspace.scratch("cpg.bin");
        let export_dir = workspace.scratch("export");

        ToolCommand::new(format!("{}-parse", program))
            .arg(workspace.source_root())
            .arg("--output")
            .arg(&cpg_bin)
            .run(&deadline)
            .await?;

        ToolCommand::new(format!("{}-export", program))
            .arg(&cpg_bin)
            .args(["--repr", "all", "--format", "graphml", "--out"])
            .arg(&export_dir)
            .args(&config.extra_args)
            .run(&deadline)
            .await?;

        let export = find_export(&export_dir).ok_or_else(|| ToolFailure::parse("no GraphML export produced"))?;
        let xml = std::fs::read_to_string(&export)
            .map_err(|e| ToolFailure::parse(format!("{}: {}", export.display(), e)))?;
        parse_cpg_graphml(&xml, |p| workspace.relativize(p, unit), unit.sole_file()).map_err(ToolFailure::parse)
    }
}

#[async_trait]
impl AnalyzerAdapter for JoernAdapter {
    fn tool(&self) -> ToolId {
        ToolId::Cpg
    }

    async fn version(&self, config: &ToolConfig) -> String {
        self.version
            .get_or_init(|| async {
                query_version(config.program(ToolId::Cpg), VERSION_TIMEOUT)
                    .await
                    .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
            })
            .await
            .clone()
    }

    #[instrument(skip(self, unit, config), fields(unit_id = %unit.id()))]
    async fn invoke(&self, unit: &SourceUnit, config: &ToolConfig) -> AdapterOutput {
        match self.run(unit, config).await {
            Ok(records) => AdapterOutput::ok(records),
            Err(failure) => AdapterOutput::failed(failure.status, failure.detail),
        }
    }
}
