//! Per-unit build pipeline and batch driver
//!
//! One build runs every enabled adapter for a unit concurrently, waits for
//! all of them, then resolves and fuses their records. The cache manager
//! wraps the whole build, so a unit whose content, tool set and tool
//! versions were seen before never reaches an adapter.

use crate::adapter::{
    default_adapters, AdapterOutput, AnalyzerAdapter, AnalyzerRecord, ToolId, ToolReport, ToolStatus, UNKNOWN_VERSION,
};
use crate::cache::{CacheKey, CacheManager, CacheOutcome};
use crate::cancel::CancellationToken;
use crate::config::PipelineConfig;
use crate::digest::{summarize, Digest};
use crate::graph::{build_skeleton, fuse, needs_skeleton, FusedGraph, FusionContext};
use crate::resolve::DeclarationIndex;
use crate::storage::{ArtifactStore, DirStore, StorageError};
use crate::unit::SourceUnit;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Slack on top of a tool's own timeout before the pipeline gives up on it.
const ADAPTER_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Unit {unit_id} failed: {reason}")]
    TaskFailed { unit_id: String, reason: String },

    #[error("Unit {unit_id} cancelled before it started")]
    Cancelled { unit_id: String },

    #[error("Invalid unit on line {line}: {reason}")]
    InvalidUnit { line: usize, reason: String },
}

/// Result of building one unit.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub unit_id: String,
    pub key: CacheKey,
    pub outcome: CacheOutcome,
    pub graph: Arc<FusedGraph>,
    pub digest: Digest,
}

/// One entry of a batch result, in input order.
#[derive(Debug)]
pub struct UnitOutcome {
    pub unit_id: String,
    pub result: Result<BuildReport, PipelineError>,
}

/// Builds fused graphs for source units.
pub struct Pipeline {
    config: PipelineConfig,
    adapters: BTreeMap<ToolId, Arc<dyn AnalyzerAdapter>>,
    cache: CacheManager,
}

impl Pipeline {
    /// Pipeline over the real tool adapters and `store`.
    pub fn new(config: PipelineConfig, store: Arc<dyn ArtifactStore>) -> Self {
        let pipeline = Self {
            config,
            adapters: BTreeMap::new(),
            cache: CacheManager::new(store),
        };
        default_adapters()
            .into_iter()
            .fold(pipeline, |p, adapter| p.with_adapter(adapter))
    }

    /// Pipeline persisting to a directory store under `config.cache_dir`.
    pub fn open(config: PipelineConfig) -> Result<Self, PipelineError> {
        let store = DirStore::open(&config.cache_dir)?;
        Ok(Self::new(config, Arc::new(store)))
    }

    /// Register `adapter`, replacing any adapter for the same tool.
    pub fn with_adapter(mut self, adapter: Arc<dyn AnalyzerAdapter>) -> Self {
        self.adapters.insert(adapter.tool(), adapter);
        self
    }

    pub fn without_adapter(mut self, tool: ToolId) -> Self {
        self.adapters.remove(&tool);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// (tool, version) for every enabled tool, in tool order.
    pub async fn tool_versions(&self) -> Vec<(ToolId, String)> {
        let mut versions = Vec::new();
        for tool in self.config.enabled_tools() {
            let tool_config = self.config.tool(tool);
            let version = match self.adapters.get(&tool) {
                Some(adapter) if tool_config.available => adapter.version(tool_config).await,
                _ => UNKNOWN_VERSION.to_string(),
            };
            versions.push((tool, version));
        }
        versions
    }

    pub async fn cache_key(&self, unit: &SourceUnit) -> CacheKey {
        CacheKey::compute(unit, &self.tool_versions().await)
    }

    /// Build (or fetch) the graph for `unit` and summarize it.
    ///
    /// Never fails: tool failures degrade the graph and are recorded in
    /// its metadata.
    pub async fn build(&self, unit: Arc<SourceUnit>) -> BuildReport {
        let key = self.cache_key(&unit).await;
        let (graph, outcome) = self
            .cache
            .get_or_build(&key, || async {
                let (records, reports) = self.run_adapters(&unit).await;
                assemble(&unit, &records, reports)
            })
            .await;
        let digest = summarize(&graph, self.config.digest.budget());
        info!(
            unit_id = %unit.id(),
            key = %key,
            outcome = outcome.as_str(),
            nodes = graph.node_count(),
            findings = digest.counts.findings,
            degradation = graph.metadata.degradation.as_str(),
            "unit built"
        );
        BuildReport {
            unit_id: unit.id().to_string(),
            key,
            outcome,
            graph,
            digest,
        }
    }

    /// Run every enabled adapter concurrently and wait for all of them.
    ///
    /// Returns the records of successful tools in tool order, plus one
    /// report per known tool.
    async fn run_adapters(&self, unit: &Arc<SourceUnit>) -> (Vec<AnalyzerRecord>, Vec<ToolReport>) {
        let mut reports = Vec::new();
        let mut running = Vec::new();

        for tool in ToolId::ALL {
            let tool_config = self.config.tool(tool);
            if !tool_config.enabled {
                reports.push(ToolReport::disabled(tool));
                continue;
            }
            let adapter = match self.adapters.get(&tool) {
                Some(adapter) if tool_config.available => adapter.clone(),
                Some(_) => {
                    let output = AdapterOutput::failed(ToolStatus::ToolNotInstalled, "marked unavailable");
                    reports.push(ToolReport::from_output(tool, UNKNOWN_VERSION, &output));
                    continue;
                }
                None => {
                    let output = AdapterOutput::failed(ToolStatus::ToolNotInstalled, "no adapter registered");
                    reports.push(ToolReport::from_output(tool, UNKNOWN_VERSION, &output));
                    continue;
                }
            };

            let unit = unit.clone();
            let tool_config = tool_config.clone();
            let guard = tool_config.timeout(tool) + ADAPTER_GRACE;
            let handle = tokio::spawn(async move {
                let version = adapter.version(&tool_config).await;
                let output = match tokio::time::timeout(guard, adapter.invoke(&unit, &tool_config)).await {
                    Ok(output) => output,
                    Err(_) => AdapterOutput::failed(ToolStatus::ToolTimeout, "adapter ignored its timeout"),
                };
                (version, output)
            });
            running.push((tool, handle));
        }

        let mut records = Vec::new();
        for (tool, handle) in running {
            let (version, output) = match handle.await {
                Ok(done) => done,
                Err(e) => (
                    UNKNOWN_VERSION.to_string(),
                    AdapterOutput::failed(ToolStatus::ToolCrashed, format!("adapter task failed: {}", e)),
                ),
            };
            if output.status.is_ok() {
                records.extend(output.records.iter().cloned());
            } else {
                warn!(
                    unit_id = %unit.id(),
                    tool = %tool,
                    status = %output.status,
                    detail = output.detail.as_deref().unwrap_or(""),
                    "tool contributed nothing"
                );
            }
            reports.push(ToolReport::from_output(tool, version, &output));
        }
        reports.sort_by_key(|r| r.tool);
        (records, reports)
    }

    /// Build every unit, at most `max_concurrent_units` at a time.
    ///
    /// Outcomes come back in input order. A unit that fails or is cancelled
    /// gets an error outcome; the rest of the batch is unaffected.
    pub async fn process_batch(
        self: &Arc<Self>,
        units: Vec<SourceUnit>,
        token: &CancellationToken,
    ) -> Vec<UnitOutcome> {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_units.max(1)));
        let mut handles = Vec::with_capacity(units.len());

        for unit in units {
            let unit_id = unit.id().to_string();
            let pipeline = self.clone();
            let permits = permits.clone();
            let token = token.clone();
            let task_id = unit_id.clone();
            let handle = tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    permit = permits.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit.filter(|_| !token.is_cancelled()) else {
                    return Err(PipelineError::Cancelled { unit_id: task_id });
                };
                Ok(pipeline.build(Arc::new(unit)).await)
            });
            handles.push((unit_id, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (unit_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(PipelineError::TaskFailed {
                    unit_id: unit_id.clone(),
                    reason: e.to_string(),
                }),
            };
            if let Err(e) = &result {
                warn!(unit_id = %unit_id, error = %e, "unit failed");
            }
            outcomes.push(UnitOutcome { unit_id, result });
        }
        outcomes
    }

    /// Build the units of a JSON Lines document, one unit per line.
    ///
    /// Lines that do not parse get an [`PipelineError::InvalidUnit`]
    /// outcome in their place; the valid units are built as one batch.
    pub async fn process_lines(self: &Arc<Self>, text: &str, token: &CancellationToken) -> Vec<UnitOutcome> {
        let parsed = parse_units(text);
        let mut valid = Vec::new();
        let mut slots = Vec::with_capacity(parsed.len());
        for (unit_id, result) in parsed {
            match result {
                Ok(unit) => {
                    valid.push(unit);
                    slots.push(None);
                }
                Err(e) => {
                    warn!(unit_id = %unit_id, error = %e, "skipping unparseable unit");
                    slots.push(Some(UnitOutcome { unit_id, result: Err(e) }));
                }
            }
        }

        let mut built = self.process_batch(valid, token).await.into_iter();
        slots
            .into_iter()
            .filter_map(|slot| slot.or_else(|| built.next()))
            .collect()
    }
}

/// Parse a JSON Lines document of units, skipping blank lines.
///
/// Each entry pairs the unit id (or `line N` when none can be read) with
/// the parsed unit or the reason it was rejected.
pub fn parse_units(text: &str) -> Vec<(String, Result<SourceUnit, PipelineError>)> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let line_no = idx + 1;
            match serde_json::from_str::<SourceUnit>(line) {
                Ok(unit) => (unit.id().to_string(), Ok(unit)),
                Err(e) => {
                    let unit_id = serde_json::from_str::<serde_json::Value>(line)
                        .ok()
                        .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string))
                        .unwrap_or_else(|| format!("line {}", line_no));
                    let error = PipelineError::InvalidUnit {
                        line: line_no,
                        reason: e.to_string(),
                    };
                    (unit_id, Err(error))
                }
            }
        })
        .collect()
}

/// Fuse the records, or fall back to a scanned skeleton when no tool
/// produced anything usable.
fn assemble(unit: &SourceUnit, records: &[AnalyzerRecord], reports: Vec<ToolReport>) -> FusedGraph {
    let skeleton = needs_skeleton(&reports);
    let context = FusionContext::new(unit, reports);
    if skeleton {
        warn!(unit_id = %unit.id(), "no tool succeeded; building structural skeleton");
        return build_skeleton(&DeclarationIndex::scan(unit), &context);
    }
    fuse(records, DeclarationIndex::build(unit, records), &context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ScriptedAdapter, Span};
    use crate::config::ToolConfig;
    use crate::graph::{Degradation, Severity};
    use crate::storage::MemoryStore;

    fn unit() -> SourceUnit {
        SourceUnit::new("u1").with_file("A.java", "class A {\n  void run(String c) {\n    exec(c);\n  }\n}\n")
    }

    fn pipeline(adapters: Vec<ScriptedAdapter>) -> Pipeline {
        let base = Pipeline::new(PipelineConfig::default(), Arc::new(MemoryStore::new()));
        adapters
            .into_iter()
            .fold(base, |p, a| p.with_adapter(Arc::new(a)))
    }

    #[tokio::test]
    async fn unavailable_tool_is_reported_without_invoking() {
        let cpg = ScriptedAdapter::new(ToolId::Cpg);
        let pattern = ScriptedAdapter::new(ToolId::Pattern)
            .with_records(vec![AnalyzerRecord::pattern_match(Span::line("A.java", 3), "cmdi")]);
        let taint = ScriptedAdapter::new(ToolId::Taint);
        let mut p = pipeline(vec![cpg.clone(), taint.clone(), pattern.clone()]);
        p.config = p.config.clone().with_tool(ToolId::Cpg, ToolConfig::unavailable());

        let report = p.build(Arc::new(unit())).await;
        assert_eq!(cpg.invocations(), 0);
        assert_eq!(pattern.invocations(), 1);
        let cpg_report = report.graph.metadata.tool(ToolId::Cpg).unwrap();
        assert_eq!(cpg_report.status, ToolStatus::ToolNotInstalled);
        assert_eq!(report.graph.metadata.degradation, Degradation::Partial);
        assert_eq!(report.digest.counts.findings, 1);
    }

    #[tokio::test]
    async fn every_tool_failing_yields_a_skeleton() {
        let p = pipeline(
            ToolId::ALL
                .iter()
                .map(|t| ScriptedAdapter::new(*t).with_status(ToolStatus::ToolCrashed))
                .collect(),
        );
        let report = p.build(Arc::new(unit())).await;
        assert_eq!(report.graph.metadata.degradation, Degradation::SkeletonOnly);
        assert_eq!(report.graph.node_count(), 2);
        assert_eq!(report.graph.failed_tools(), ToolId::ALL.to_vec());
        assert!(report.digest.findings.is_empty());
    }

    #[tokio::test]
    async fn panicking_adapter_is_contained() {
        let p = pipeline(vec![
            ScriptedAdapter::new(ToolId::Cpg).with_panic(),
            ScriptedAdapter::new(ToolId::Taint),
            ScriptedAdapter::new(ToolId::Pattern).with_records(vec![AnalyzerRecord::pattern_match(
                Span::line("A.java", 3),
                "cmdi",
            )
            .with_severity(Severity::Critical)]),
        ]);
        let report = p.build(Arc::new(unit())).await;
        let cpg = report.graph.metadata.tool(ToolId::Cpg).unwrap();
        assert_eq!(cpg.status, ToolStatus::ToolCrashed);
        assert_eq!(report.digest.findings[0].severity, Some(Severity::Critical));
    }

    #[tokio::test]
    async fn disabled_tools_leave_the_key_and_are_not_invoked() {
        let taint = ScriptedAdapter::new(ToolId::Taint);
        let mut p = pipeline(vec![taint.clone()]);
        let enabled_key = p.cache_key(&unit()).await;
        p.config = p.config.clone().with_tool(ToolId::Taint, ToolConfig::disabled());
        let disabled_key = p.cache_key(&unit()).await;
        assert_ne!(enabled_key, disabled_key);

        let report = p.build(Arc::new(unit())).await;
        assert_eq!(taint.invocations(), 0);
        assert_eq!(report.graph.metadata.tool(ToolId::Taint).unwrap().status, ToolStatus::Disabled);
        assert!(!report.graph.tool_set().contains(&ToolId::Taint));
    }

    #[test]
    fn unparseable_lines_are_rejected_one_by_one() {
        let good = serde_json::to_string(&unit()).unwrap();
        let text = format!("{}\n\n{{\"id\": \"broken\", \"files\": 7}}\nnot json\n", good);
        let parsed = parse_units(&text);

        let ids: Vec<&str> = parsed.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "broken", "line 4"]);
        assert!(parsed[0].1.is_ok());
        assert!(matches!(parsed[1].1, Err(PipelineError::InvalidUnit { line: 3, .. })));
        assert!(matches!(parsed[2].1, Err(PipelineError::InvalidUnit { line: 4, .. })));
    }
}
