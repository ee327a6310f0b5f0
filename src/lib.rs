//! secgraph: fused security graphs from heterogeneous static analyzers
//!
//! Runs a code-property-graph extractor, a taint analyzer and a pattern
//! scanner over a source unit, resolves their tool-specific locations to
//! one canonical node identity, and fuses the results into a single
//! labelled graph. Graphs are cached by content, tool set and tool
//! versions, and compressed into bounded digests for prompt assembly.
//!
//! # Core Concepts
//!
//! - **Adapters**: one per external tool, normalising its output into
//!   [`AnalyzerRecord`]s and reporting failures as a [`ToolStatus`]
//! - **Node keys**: `(file, start line, end line, scope)` identities shared
//!   by every tool's view of the same declaration
//! - **Degradation**: a graph built with failed tools says so in its
//!   metadata rather than failing the build
//!
//! # Example
//!
//! ```no_run
//! use secgraph::{MemoryStore, Pipeline, PipelineConfig, SourceUnit};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let pipeline = Pipeline::new(PipelineConfig::default(), Arc::new(MemoryStore::new()));
//! let unit = SourceUnit::new("demo").with_file("A.java", "class A {}\n");
//! let report = pipeline.build(Arc::new(unit)).await;
//! println!("{} findings", report.digest.counts.findings);
//! # }
//! ```

pub mod adapter;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod digest;
pub mod graph;
pub mod pipeline;
pub mod resolve;
pub mod storage;
pub mod unit;

pub use adapter::{AnalyzerAdapter, AnalyzerRecord, ScriptedAdapter, Span, ToolId, ToolReport, ToolStatus};
pub use cache::{CacheKey, CacheManager, CacheOutcome, CacheStats};
pub use cancel::CancellationToken;
pub use config::{ConfigError, PipelineConfig, ToolConfig};
pub use digest::{render, summarize, DetailLevel, Digest, ItemBudget};
pub use graph::{Degradation, EdgeKind, FusedGraph, GraphNode, NodeKey, Severity};
pub use pipeline::{BuildReport, Pipeline, PipelineError, UnitOutcome};
pub use storage::{ArtifactStore, DirStore, MemoryStore, StorageError, StorageResult};
pub use unit::{SourceUnit, UnitScope, Variant};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
