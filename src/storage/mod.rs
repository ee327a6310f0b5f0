//! Storage backends for fused graphs
//!
//! Graphs persist through the [`ArtifactStore`] trait. [`DirStore`] writes
//! the structured graph and its findings listing side by side on disk and
//! indexes builds in a SQLite manifest; [`MemoryStore`] keeps the same
//! artifacts in memory for tests and one-shot runs.

mod dir;
mod manifest;
mod memory;
mod traits;

pub use dir::DirStore;
pub use manifest::{ManifestEntry, SqliteManifest};
pub use memory::MemoryStore;
pub use traits::{Artifact, ArtifactStore, StorageError, StorageResult};
