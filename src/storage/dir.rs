//! Directory-backed artifact store
//!
//! Layout under the root:
//!
//! ```text
//! manifest.db
//! graphs/<shard>/<key>.graph.json
//! graphs/<shard>/<key>.findings.txt
//! ```
//!
//! Each file is written to a temporary sibling and renamed into place, so a
//! reader never sees a half-written file. A crash between the two renames
//! leaves siblings with different fingerprints, which load reports as
//! inconsistent.

use super::manifest::{ManifestEntry, SqliteManifest};
use super::traits::{Artifact, ArtifactStore, StorageError, StorageResult};
use crate::cache::CacheKey;
use crate::graph::FusedGraph;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const GRAPH_SUFFIX: &str = "graph.json";
const LISTING_SUFFIX: &str = "findings.txt";

pub struct DirStore {
    root: PathBuf,
    manifest: SqliteManifest,
}

impl DirStore {
    /// Open or create a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("graphs"))?;
        let manifest = SqliteManifest::open(root.join("manifest.db"))?;
        Ok(Self { root, manifest })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join("graphs").join(key.shard())
    }

    pub fn graph_path(&self, key: &CacheKey) -> PathBuf {
        self.shard_dir(key).join(format!("{}.{}", key, GRAPH_SUFFIX))
    }

    pub fn listing_path(&self, key: &CacheKey) -> PathBuf {
        self.shard_dir(key).join(format!("{}.{}", key, LISTING_SUFFIX))
    }

    fn write_atomic(dir: &Path, path: &Path, contents: &str) -> StorageResult<()> {
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }
}

/// File contents, or `None` when the file does not exist.
fn read_optional(path: &Path) -> StorageResult<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) if e.kind() == ErrorKind::InvalidData => Err(StorageError::Corrupt {
            key: path.display().to_string(),
            reason: e.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

impl ArtifactStore for DirStore {
    fn load(&self, key: &CacheKey) -> StorageResult<Option<FusedGraph>> {
        let Some(graph_json) = read_optional(&self.graph_path(key))? else {
            return Ok(None);
        };
        let Some(listing) = read_optional(&self.listing_path(key))? else {
            return Err(StorageError::Inconsistent { key: key.to_string() });
        };
        let graph = Artifact { graph_json, listing }.decode(key)?;
        debug!(key = %key, "loaded graph from directory store");
        Ok(Some(graph))
    }

    fn save(&self, key: &CacheKey, graph: &FusedGraph) -> StorageResult<()> {
        let artifact = Artifact::render(graph)?;
        let dir = self.shard_dir(key);
        std::fs::create_dir_all(&dir)?;
        Self::write_atomic(&dir, &self.graph_path(key), &artifact.graph_json)?;
        Self::write_atomic(&dir, &self.listing_path(key), &artifact.listing)?;
        self.manifest.record(&ManifestEntry::from_graph(key, graph))?;
        debug!(key = %key, path = %self.graph_path(key).display(), "persisted graph");
        Ok(())
    }

    fn contains(&self, key: &CacheKey) -> StorageResult<bool> {
        Ok(self.graph_path(key).is_file())
    }

    fn list(&self) -> StorageResult<Vec<ManifestEntry>> {
        self.manifest.list()
    }
}
