//! Scripted adapter for exercising the pipeline without external tools
//!
//! Returns canned records or a canned failure status, optionally after a
//! delay, and counts how often it was invoked.

use super::traits::AnalyzerAdapter;
use super::types::{AdapterOutput, AnalyzerRecord, ToolId, ToolStatus};
use crate::config::ToolConfig;
use crate::unit::SourceUnit;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A deterministic stand-in for one analyzer.
///
/// Records are returned as-is for every unit; failure statuses return no
/// records. The invocation counter is shared between clones so a test can
/// keep a handle after moving the adapter into a pipeline.
#[derive(Debug, Clone)]
pub struct ScriptedAdapter {
    tool: ToolId,
    records: Vec<AnalyzerRecord>,
    status: ToolStatus,
    version: String,
    delay: Option<Duration>,
    panics: bool,
    invocations: Arc<AtomicUsize>,
}

impl ScriptedAdapter {
    pub fn new(tool: ToolId) -> Self {
        Self {
            tool,
            records: Vec::new(),
            status: ToolStatus::Ok,
            version: "scripted-1.0".to_string(),
            delay: None,
            panics: false,
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_records(mut self, records: Vec<AnalyzerRecord>) -> Self {
        self.records = records;
        self
    }

    pub fn with_status(mut self, status: ToolStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sleep before answering. Honours the configured timeout: a delay
    /// longer than the tool's budget reports `tool-timeout`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Panic inside `invoke`, as a buggy adapter would.
    pub fn with_panic(mut self) -> Self {
        self.panics = true;
        self
    }

    /// How many times `invoke` has been called across all clones.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalyzerAdapter for ScriptedAdapter {
    fn tool(&self) -> ToolId {
        self.tool
    }

    async fn version(&self, _config: &ToolConfig) -> String {
        self.version.clone()
    }

    async fn invoke(&self, _unit: &SourceUnit, config: &ToolConfig) -> AdapterOutput {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("scripted {} adapter panicked", self.tool);
        }

        if let Some(delay) = self.delay {
            let budget = config.timeout(self.tool);
            if tokio::time::timeout(budget, tokio::time::sleep(delay)).await.is_err() {
                return AdapterOutput::failed(
                    ToolStatus::ToolTimeout,
                    format!("scripted delay exceeded {}s", budget.as_secs()),
                );
            }
        }

        if self.status.is_ok() {
            AdapterOutput::ok(self.records.clone())
        } else {
            AdapterOutput::failed(self.status, format!("scripted {}", self.status))
        }
    }
}
