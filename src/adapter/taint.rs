//! Taint adapter: CodeQL dataflow queries with SARIF output
//!
//! Builds a CodeQL database from the materialized unit, runs the configured
//! query suite, and turns each SARIF result into one `taint-path` record
//! whose spans are the hops of its first code flow.

use super::process::{query_version, Deadline, ToolCommand, ToolFailure, Workspace};
use super::traits::{AnalyzerAdapter, UNKNOWN_VERSION};
use super::types::{attr, AdapterOutput, AnalyzerRecord, Span, ToolId};
use crate::config::ToolConfig;
use crate::graph::Severity;
use crate::unit::SourceUnit;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

const VERSION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SarifLog {
    runs: Vec<SarifRun>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SarifRun {
    tool: SarifTool,
    results: Vec<SarifResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SarifTool {
    driver: SarifDriver,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SarifDriver {
    rules: Vec<SarifRule>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SarifRule {
    id: String,
    properties: SarifProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SarifProperties {
    #[serde(rename = "security-severity")]
    security_severity: Option<String>,
    #[serde(rename = "problem.severity")]
    problem_severity: Option<String>,
    tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SarifResult {
    rule_id: Option<String>,
    level: Option<String>,
    message: SarifMessage,
    locations: Vec<SarifLocation>,
    code_flows: Vec<SarifCodeFlow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SarifMessage {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SarifCodeFlow {
    thread_flows: Vec<SarifThreadFlow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SarifThreadFlow {
    locations: Vec<SarifThreadFlowLocation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SarifThreadFlowLocation {
    location: Option<SarifLocation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SarifLocation {
    physical_location: Option<SarifPhysicalLocation>,
    message: Option<SarifMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SarifPhysicalLocation {
    artifact_location: Option<SarifArtifactLocation>,
    region: Option<SarifRegion>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SarifArtifactLocation {
    uri: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SarifRegion {
    start_line: Option<u32>,
    end_line: Option<u32>,
    start_column: Option<u32>,
}

impl SarifLocation {
    fn span(&self, resolve_file: &impl Fn(&str) -> String) -> Option<Span> {
        let physical = self.physical_location.as_ref()?;
        let uri = physical.artifact_location.as_ref()?.uri.as_deref()?;
        let region = physical.region.as_ref()?;
        let start = region.start_line?;
        let mut span = Span::new(resolve_file(uri), start, region.end_line.unwrap_or(start));
        if let Some(column) = region.start_column {
            span = span.with_column(column);
        }
        Some(span)
    }

    fn note(&self) -> Option<&str> {
        self.message.as_ref()?.text.as_deref()
    }
}

fn rule_severity(rule: Option<&SarifRule>, level: Option<&str>) -> Option<Severity> {
    let scored = rule
        .and_then(|r| r.properties.security_severity.as_deref())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .map(Severity::from_score);
    scored
        .or_else(|| level.and_then(Severity::parse))
        .or_else(|| rule.and_then(|r| r.properties.problem_severity.as_deref()).and_then(Severity::parse))
}

/// Parse a SARIF log into taint-path records.
///
/// Hops come from the first thread flow of the first code flow; a result
/// without flows becomes a single-hop path at its primary location.
/// Results with no locatable hop are skipped.
pub fn parse_taint_sarif(text: &str, resolve_file: impl Fn(&str) -> String) -> serde_json::Result<Vec<AnalyzerRecord>> {
    let log: SarifLog = serde_json::from_str(text)?;
    let mut records = Vec::new();

    for run in &log.runs {
        let rules: HashMap<&str, &SarifRule> = run.tool.driver.rules.iter().map(|r| (r.id.as_str(), r)).collect();
        for result in &run.results {
            let flow: Vec<&SarifLocation> = result
                .code_flows
                .first()
                .and_then(|cf| cf.thread_flows.first())
                .map(|tf| tf.locations.iter().filter_map(|l| l.location.as_ref()).collect())
                .unwrap_or_default();
            let hops_from: Vec<&SarifLocation> = if flow.is_empty() {
                result.locations.iter().take(1).collect()
            } else {
                flow
            };
            let hops: Vec<Span> = hops_from.iter().filter_map(|l| l.span(&resolve_file)).collect();
            let Some(anchor) = hops.first().cloned() else { continue };

            let rule_id = result.rule_id.clone().unwrap_or_else(|| "taint".to_string());
            let rule = rules.get(rule_id.as_str()).copied();
            let mut record = AnalyzerRecord::taint_path(anchor, hops).with_rule_id(&rule_id);
            if let Some(severity) = rule_severity(rule, result.level.as_deref()) {
                record = record.with_severity(severity);
            }
            if let Some(message) = result.message.text.as_deref() {
                record = record.with_message(message);
            }
            if let Some(source) = hops_from.first().and_then(|l| l.note()) {
                record = record.with_attribute(attr::TAINT_SOURCE, source);
            }
            if let Some(sink) = hops_from.last().and_then(|l| l.note()) {
                record = record.with_attribute(attr::TAINT_SINK, sink);
            }
            if let Some(cwe) = rule.map(|r| cwe_tags(&r.properties.tags)).filter(|c| !c.is_empty()) {
                record = record.with_attribute(attr::CWE, cwe);
            }
            records.push(record);
        }
    }
    debug!(paths = records.len(), "parsed SARIF taint results");
    Ok(records)
}

/// `external/cwe/cwe-089` tags as `CWE-089`, `;`-joined.
fn cwe_tags(tags: &[String]) -> String {
    tags.iter()
        .filter_map(|t| t.strip_prefix("external/cwe/"))
        .map(|t| t.to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Drives CodeQL (`database create`, `database analyze`).
#[derive(Debug, Default)]
pub struct CodeQlAdapter {
    version: OnceCell<String>,
}

impl CodeQlAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run(&self, unit: &SourceUnit, config: &ToolConfig) -> Result<Vec<AnalyzerRecord>, ToolFailure> {
        let deadline = Deadline::after(config.timeout(ToolId::Taint));
        let workspace =
            Workspace::materialize(unit).map_err(|e| ToolFailure::crashed(format!("workspace: {}", e)))?;
        let program = config.program(ToolId::Taint);
        let language = config.language();
        let database = workspace.scratch("codeql-db");
        let results = workspace.scratch("taint.sarif");
        let query = config
            .ruleset
            .clone()
            .unwrap_or_else(|| format!("codeql/{}-queries", language));

        ToolCommand::new(program)
            .args(["database", "create"])
            .arg(&database)
            .arg(format!("--language={}", language))
            .arg("--source-root")
            .arg(workspace.source_root())
            .arg("--overwrite")
            .run(&deadline)
            .await?;

        ToolCommand::new(program)
            .args(["database", "analyze"])
            .arg(&database)
            .arg(query)
            .arg("--format=sarif-latest")
            .arg("--output")
            .arg(&results)
            .args(&config.extra_args)
            .run(&deadline)
            .await?;

        let text = std::fs::read_to_string(&results)
            .map_err(|e| ToolFailure::parse(format!("{}: {}", results.display(), e)))?;
        parse_taint_sarif(&text, |p| workspace.relativize(p, unit)).map_err(|e| ToolFailure::parse(e.to_string()))
    }
}

#[async_trait]
impl AnalyzerAdapter for CodeQlAdapter {
    fn tool(&self) -> ToolId {
        ToolId::Taint
    }

    async fn version(&self, config: &ToolConfig) -> String {
        self.version
            .get_or_init(|| async {
                query_version(config.program(ToolId::Taint), VERSION_TIMEOUT)
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
