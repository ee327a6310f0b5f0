//! Pattern adapter: Semgrep rule matches from `--json` output

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
use tracing::{debug, instrument, warn};

const VERSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Rules used when none are configured.
const DEFAULT_RULESET: &str = "auto";

#[derive(Debug, Default, Deserialize)]
struct SemgrepOutput {
    #[serde(default)]
    results: Vec<SemgrepResult>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SemgrepResult {
    check_id: String,
    path: String,
    start: Position,
    end: Position,
    #[serde(default)]
    extra: SemgrepExtra,
}

#[derive(Debug, Deserialize)]
struct Position {
    line: u32,
    #[serde(default)]
    col: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SemgrepExtra {
    #[serde(default)]
    message: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    lines: String,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

/// Semgrep's ERROR/WARNING/INFO, or explicit severity words.
fn semgrep_severity(raw: &str) -> Option<Severity> {
    if raw.eq_ignore_ascii_case("info") {
        return Some(Severity::Low);
    }
    Severity::parse(raw)
}

/// CWE identifiers from rule metadata, which may be a string or a list.
fn cwe_list(metadata: &HashMap<String, serde_json::Value>) -> Option<String> {
    let cwes: Vec<String> = match metadata.get("cwe")? {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    };
    if cwes.is_empty() {
        None
    } else {
        Some(cwes.join("; "))
    }
}

/// Parse Semgrep JSON output into pattern-match records.
pub fn parse_semgrep_json(text: &str, resolve_file: impl Fn(&str) -> String) -> serde_json::Result<Vec<AnalyzerRecord>> {
    let output: SemgrepOutput = serde_json::from_str(text)?;
    if !output.errors.is_empty() {
        debug!(errors = output.errors.len(), "semgrep reported non-fatal errors");
    }
    let records: Vec<AnalyzerRecord> = output
        .results
        .into_iter()
        .map(|result| {
            let mut span = Span::new(resolve_file(&result.path), result.start.line, result.end.line);
            if let Some(col) = result.start.col {
                span = span.with_column(col);
            }
            let mut record = AnalyzerRecord::pattern_match(span, result.check_id);
            if let Some(severity) = semgrep_severity(&result.extra.severity) {
                record = record.with_severity(severity);
            }
            if !result.extra.message.is_empty() {
                record = record.with_message(result.extra.message.trim());
            }
            if let Some(cwe) = cwe_list(&result.extra.metadata) {
                record = record.with_attribute(attr::CWE, cwe);
            }
            if !result.extra.lines.trim().is_empty() && result.extra.lines != "requires login" {
                record = record.with_attribute(attr::CODE, result.extra.lines.trim());
            }
            record
        })
        .collect();
    debug!(matches = records.len(), "parsed semgrep results");
    Ok(records)
}

/// Drives Semgrep.
#[derive(Debug, Default)]
pub struct SemgrepAdapter {
    version: OnceCell<String>,
}

impl SemgrepAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run(&self, unit: &SourceUnit, config: &ToolConfig) -> Result<Vec<AnalyzerRecord>, ToolFailure> {
        let timeout = config.timeout(ToolId::Pattern);
        let deadline = Deadline::after(timeout);
        let workspace =
            Workspace::materialize(unit).map_err(|e| ToolFailure::crashed(format!("workspace: {}", e)))?;

        // exit code 1 means findings were reported
        let output = ToolCommand::new(config.program(ToolId::Pattern))
            .arg("--json")
            .arg("--config")
            .arg(config.ruleset.as_deref().unwrap_or(DEFAULT_RULESET))
            .arg("--metrics=off")
            .arg("--no-git-ignore")
            .arg("--timeout")
            .arg(timeout.as_secs().to_string())
            .args(&config.extra_args)
            .arg(workspace.source_root())
            .accept_exit_codes(&[0, 1])
            .run(&deadline)
            .await?;

        parse_semgrep_json(&output.stdout, |p| workspace.relativize(p, unit)).map_err(|e| {
            warn!(error = %e, "semgrep output unparseable");
            ToolFailure::parse(e.to_string())
        })
    }
}

#[async_trait]
impl AnalyzerAdapter for SemgrepAdapter {
    fn tool(&self) -> ToolId {
        ToolId::Pattern
    }

    async fn version(&self, config: &ToolConfig) -> String {
        self.version
            .get_or_init(|| async {
                query_version(config.program(ToolId::Pattern), VERSION_TIMEOUT)
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
