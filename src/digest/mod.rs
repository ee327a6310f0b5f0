//! Digest summarizer
//!
//! Compresses a fused graph into a bounded, ranked summary for downstream
//! prompt assembly, and renders that summary as text.

mod render;
mod summarize;

pub use render::render;
pub use summarize::{
    summarize, AggregateCounts, DetailLevel, Digest, Finding, ItemBudget, TaintPathSummary, Truncation,
};
