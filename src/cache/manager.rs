//! Single-build-per-key cache over an artifact store

use super::key::CacheKey;
use crate::graph::FusedGraph;
use crate::storage::ArtifactStore;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

/// How a `get_or_build` call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Loaded from the store; nothing ran
    Hit,
    /// This caller ran the build
    Built,
    /// Another caller's in-flight build supplied the result
    Joined,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Built => "built",
            Self::Joined => "joined",
        }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub builds: usize,
    pub joins: usize,
    /// Stored artifacts that failed to load and were rebuilt
    pub corrupt: usize,
}

type Pending = Arc<OnceCell<Arc<FusedGraph>>>;

/// Content-addressed graph cache.
///
/// Concurrent requests for one key share a single pending build: the first
/// caller installs a placeholder, later callers await it, and it resolves
/// exactly once. Unrelated keys never contend beyond the map shard.
pub struct CacheManager {
    store: Arc<dyn ArtifactStore>,
    in_flight: DashMap<CacheKey, Pending>,
    hits: AtomicUsize,
    builds: AtomicUsize,
    joins: AtomicUsize,
    corrupt: AtomicUsize,
}

impl CacheManager {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            in_flight: DashMap::new(),
            hits: AtomicUsize::new(0),
            builds: AtomicUsize::new(0),
            joins: AtomicUsize::new(0),
            corrupt: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Load a stored graph. Unusable artifacts count as misses.
    pub fn lookup(&self, key: &CacheKey) -> Option<FusedGraph> {
        match self.store.load(key) {
            Ok(found) => found,
            Err(e) => {
                if e.is_corruption() {
                    self.corrupt.fetch_add(1, Ordering::SeqCst);
                }
                warn!(key = %key, error = %e, "cached graph unusable; rebuilding");
                None
            }
        }
    }

    /// Return the graph for `key`, running `build` only when neither the
    /// store nor an in-flight build can supply it.
    #[instrument(skip(self, key, build), fields(key = %key))]
    pub async fn get_or_build<F, Fut>(&self, key: &CacheKey, build: F) -> (Arc<FusedGraph>, CacheOutcome)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FusedGraph>,
    {
        if let Some(graph) = self.lookup(key) {
            self.hits.fetch_add(1, Ordering::SeqCst);
            debug!("cache hit");
            return (Arc::new(graph), CacheOutcome::Hit);
        }

        let cell: Pending = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut outcome = CacheOutcome::Joined;
        let slot = &mut outcome;
        let graph = cell
            .get_or_init(|| async move {
                // a build that finished between our lookup and our insert;
                // a load error here was already counted by the fast path
                if let Some(graph) = self.store.load(key).ok().flatten() {
                    *slot = CacheOutcome::Hit;
                    return Arc::new(graph);
                }
                *slot = CacheOutcome::Built;
                let graph = build().await;
                if let Err(e) = self.store.save(key, &graph) {
                    warn!(key = %key, error = %e, "failed to persist graph");
                }
                Arc::new(graph)
            })
            .await
            .clone();

        self.in_flight.remove_if(key, |_, pending| Arc::ptr_eq(pending, &cell));

        let counter = match outcome {
            CacheOutcome::Hit => &self.hits,
            CacheOutcome::Built => &self.builds,
            CacheOutcome::Joined => &self.joins,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        debug!(outcome = outcome.as_str(), "cache resolved");
        (graph, outcome)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::SeqCst),
            builds: self.builds.load(Ordering::SeqCst),
            joins: self.joins.load(Ordering::SeqCst),
            corrupt: self.corrupt.load(Ordering::SeqCst),
        }
    }

    /// Keys with a build currently running.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }
}
