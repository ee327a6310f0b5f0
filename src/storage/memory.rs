//! In-memory artifact store

use super::manifest::ManifestEntry;
use super::traits::{Artifact, ArtifactStore, StorageResult};
use crate::cache::CacheKey;
use crate::graph::FusedGraph;
use dashmap::DashMap;

/// Keeps rendered artifacts in memory. Artifacts are stored as text, the
/// same as on disk, so loads go through the same verification.
#[derive(Debug, Default)]
pub struct MemoryStore {
    artifacts: DashMap<CacheKey, (Artifact, ManifestEntry)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Overwrite the stored text for `key`, e.g. to simulate corruption.
    pub fn replace_raw(&self, key: &CacheKey, graph_json: impl Into<String>, listing: impl Into<String>) -> bool {
        match self.artifacts.get_mut(key) {
            Some(mut entry) => {
                entry.0 = Artifact {
                    graph_json: graph_json.into(),
                    listing: listing.into(),
                };
                true
            }
            None => false,
        }
    }

    pub fn raw(&self, key: &CacheKey) -> Option<Artifact> {
        self.artifacts.get(key).map(|e| e.0.clone())
    }
}

impl ArtifactStore for MemoryStore {
    fn load(&self, key: &CacheKey) -> StorageResult<Option<FusedGraph>> {
        let Some(artifact) = self.raw(key) else {
            return Ok(None);
        };
        artifact.decode(key).map(Some)
    }

    fn save(&self, key: &CacheKey, graph: &FusedGraph) -> StorageResult<()> {
        let artifact = Artifact::render(graph)?;
        self.artifacts
            .insert(key.clone(), (artifact, ManifestEntry::from_graph(key, graph)));
        Ok(())
    }

    fn contains(&self, key: &CacheKey) -> StorageResult<bool> {
        Ok(self.artifacts.contains_key(key))
    }

    fn list(&self) -> StorageResult<Vec<ManifestEntry>> {
        let mut entries: Vec<ManifestEntry> = self.artifacts.iter().map(|e| e.value().1.clone()).collect();
        entries.sort_by(|a, b| a.built_at.cmp(&b.built_at).then_with(|| a.key.cmp(&b.key)));
        Ok(entries)
    }
}
