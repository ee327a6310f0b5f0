//! Adapter trait: the contract every analyzer adapter implements
//!
//! An adapter runs one external tool against a source unit and normalizes
//! its output into [`AnalyzerRecord`](super::AnalyzerRecord)s. Failure is a
//! status, never an error: a tool that cannot produce output contributes
//! nothing and says why.

use super::types::{AdapterOutput, ToolId};
use crate::config::ToolConfig;
use crate::unit::SourceUnit;
use async_trait::async_trait;

/// Reported when a tool's version cannot be determined.
pub const UNKNOWN_VERSION: &str = "unavailable";

/// The contract analyzer adapters implement.
///
/// Adapters are independent: none may assume another has run, and each
/// invocation starts from nothing but the unit and the configuration.
#[async_trait]
pub trait AnalyzerAdapter: Send + Sync {
    /// Which tool this adapter drives
    fn tool(&self) -> ToolId;

    /// The tool's version string, part of every cache key.
    ///
    /// Returns [`UNKNOWN_VERSION`] when the tool cannot be queried.
    async fn version(&self, config: &ToolConfig) -> String;

    /// Run the tool against `unit`.
    ///
    /// Must honor `config`'s timeout and kill the tool on expiry. A non-ok
    /// status always comes with an empty record list.
    async fn invoke(&self, unit: &SourceUnit, config: &ToolConfig) -> AdapterOutput;
}
