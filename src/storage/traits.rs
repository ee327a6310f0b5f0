//! Storage trait definitions

use super::manifest::ManifestEntry;
use crate::cache::CacheKey;
use crate::graph::{listing_fingerprint, render_listing, FusedGraph};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt artifact {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Graph and listing disagree for {key}")]
    Inconsistent { key: String },

    #[error("Date parsing error: {0}")]
    DateParse(String),
}

impl StorageError {
    /// Whether the error means the stored artifact is unusable and should be rebuilt.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corrupt { .. } | Self::Inconsistent { .. } | Self::Serialization(_)
        )
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// The two sibling files of one build, as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub graph_json: String,
    pub listing: String,
}

impl Artifact {
    /// Render both siblings from one graph.
    pub fn render(graph: &FusedGraph) -> StorageResult<Self> {
        let fingerprint = graph.content_fingerprint()?;
        Ok(Self {
            graph_json: graph.to_json()?,
            listing: render_listing(graph, &fingerprint),
        })
    }

    /// Parse and verify: the graph must be well-formed and the listing must
    /// carry the graph's fingerprint.
    pub fn decode(&self, key: &CacheKey) -> StorageResult<FusedGraph> {
        let graph = FusedGraph::from_json(&self.graph_json).map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        graph.check_integrity().map_err(|reason| StorageError::Corrupt {
            key: key.to_string(),
            reason,
        })?;
        let fingerprint = graph.content_fingerprint()?;
        if listing_fingerprint(&self.listing) != Some(fingerprint.as_str()) {
            return Err(StorageError::Inconsistent { key: key.to_string() });
        }
        Ok(graph)
    }
}

/// Trait for fused-graph artifact stores
///
/// Implementations must be thread-safe (Send + Sync); the cache manager
/// shares one store across every concurrent build.
pub trait ArtifactStore: Send + Sync {
    /// Load the graph stored under `key`. `Ok(None)` when nothing is stored;
    /// a corrupt or inconsistent artifact is an error.
    fn load(&self, key: &CacheKey) -> StorageResult<Option<FusedGraph>>;

    /// Persist both siblings for `key`, replacing any previous artifact.
    fn save(&self, key: &CacheKey, graph: &FusedGraph) -> StorageResult<()>;

    fn contains(&self, key: &CacheKey) -> StorageResult<bool>;

    /// Every recorded build, oldest first.
    fn list(&self) -> StorageResult<Vec<ManifestEntry>>;
}
