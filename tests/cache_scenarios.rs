//! Cache scenarios
//!
//! A graph is keyed by unit content, tool set and tool versions. Repeat
//! requests must not reach an adapter, any change to one key component must
//! miss, damaged artifacts must be rebuilt, and concurrent requests for one
//! key must share a single build.

mod common;

use common::*;
use secgraph::adapter::{ScriptedAdapter, ToolId};
use secgraph::{ArtifactStore, CacheOutcome, DirStore, MemoryStore, Pipeline, PipelineConfig, ToolConfig};
use std::sync::Arc;
use std::time::Duration;

// === Scenario: Second request is served from the store ===

#[tokio::test]
async fn repeat_build_invokes_no_tool() {
    let analyzers = Analyzers::healthy();
    let pipeline = memory_pipeline(&analyzers);

    let first = pipeline.build(Arc::new(dao_unit())).await;
    assert_eq!(first.outcome, CacheOutcome::Built);
    assert_eq!(analyzers.total_invocations(), 3);

    let second = pipeline.build(Arc::new(dao_unit())).await;
    assert_eq!(second.outcome, CacheOutcome::Hit);
    assert_eq!(second.key, first.key);
    assert_eq!(analyzers.total_invocations(), 3);
    assert_eq!(second.graph.nodes, first.graph.nodes);
    assert_eq!(pipeline.cache().stats().hits, 1);
}

// === Scenario: One changed character misses ===

#[tokio::test]
async fn edited_source_gets_a_new_key() {
    let analyzers = Analyzers::healthy();
    let pipeline = memory_pipeline(&analyzers);

    let original = pipeline.build(Arc::new(dao_unit())).await;
    let edited_unit = dao_unit_with_line_12("        ResultSet rs = conn.createStatement().executeQuery(q );");
    let edited = pipeline.build(Arc::new(edited_unit)).await;

    assert_ne!(edited.key, original.key);
    assert_eq!(edited.outcome, CacheOutcome::Built);
    assert_eq!(analyzers.total_invocations(), 6);
}

#[tokio::test]
async fn line_endings_alone_do_not_miss() {
    let analyzers = Analyzers::healthy();
    let pipeline = memory_pipeline(&analyzers);
    let crlf = secgraph::SourceUnit::new("dao-1").with_file(DAO_FILE, DAO_SOURCE.replace('\n', "\r\n"));

    let first = pipeline.build(Arc::new(dao_unit())).await;
    let second = pipeline.build(Arc::new(crlf)).await;
    assert_eq!(first.key, second.key);
    assert_eq!(second.outcome, CacheOutcome::Hit);
}

// === Scenario: Tool upgrade or tool-set change misses ===

#[tokio::test]
async fn tool_version_and_tool_set_are_part_of_the_key() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let analyzers = Analyzers::healthy();
    let base = pipeline_with(&analyzers, PipelineConfig::default(), store.clone());
    let original = base.build(Arc::new(dao_unit())).await;

    let mut upgraded = Analyzers::healthy();
    upgraded.pattern = ScriptedAdapter::new(ToolId::Pattern)
        .with_records(pattern_records())
        .with_version("scripted-2.0");
    let after_upgrade = pipeline_with(&upgraded, PipelineConfig::default(), store.clone())
        .build(Arc::new(dao_unit()))
        .await;
    assert_ne!(after_upgrade.key, original.key);
    assert_eq!(after_upgrade.outcome, CacheOutcome::Built);
    assert_eq!(upgraded.pattern.invocations(), 1);

    let without_taint = PipelineConfig::default().with_tool(ToolId::Taint, ToolConfig::disabled());
    let narrowed = pipeline_with(&Analyzers::healthy(), without_taint, store.clone())
        .build(Arc::new(dao_unit()))
        .await;
    assert_ne!(narrowed.key, original.key);
    assert_eq!(narrowed.outcome, CacheOutcome::Built);
    assert_eq!(store.len(), 3);
}

// === Scenario: Damaged artifact is rebuilt ===

#[tokio::test]
async fn corrupt_artifact_is_rebuilt_not_returned() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let analyzers = Analyzers::healthy();
    let pipeline = pipeline_with(&analyzers, PipelineConfig::default(), store.clone());

    let first = pipeline.build(Arc::new(dao_unit())).await;
    let listing = store.raw(&first.key).expect("stored").listing;
    assert!(store.replace_raw(&first.key, "{\"nodes\": [", listing));

    let second = pipeline.build(Arc::new(dao_unit())).await;
    assert_eq!(second.outcome, CacheOutcome::Built);
    assert_eq!(second.graph.nodes, first.graph.nodes);
    assert_eq!(analyzers.total_invocations(), 6);
    assert_eq!(pipeline.cache().stats().corrupt, 1);

    // the rebuild replaced the damaged artifact
    let third = pipeline.build(Arc::new(dao_unit())).await;
    assert_eq!(third.outcome, CacheOutcome::Hit);
}

// === Scenario: Cache survives a restart ===

#[tokio::test]
async fn directory_store_serves_a_fresh_process() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::default().with_cache_dir(dir.path());

    let first_run = Analyzers::healthy();
    let built = pipeline_with(&first_run, config.clone(), Arc::new(DirStore::open(dir.path()).unwrap()))
        .build(Arc::new(dao_unit()))
        .await;
    assert_eq!(built.outcome, CacheOutcome::Built);

    let second_run = Analyzers::healthy();
    let store = Arc::new(DirStore::open(dir.path()).unwrap());
    let pipeline = pipeline_with(&second_run, config, store.clone());
    let reloaded = pipeline.build(Arc::new(dao_unit())).await;

    assert_eq!(reloaded.outcome, CacheOutcome::Hit);
    assert_eq!(second_run.total_invocations(), 0);
    assert_eq!(reloaded.graph.nodes, built.graph.nodes);
    assert_eq!(reloaded.graph.edges, built.graph.edges);

    let entries = store.list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, built.key.to_string());
    assert_eq!(entries[0].unit_id, "dao-1");
    assert_eq!(entries[0].findings, 1);
}

// === Scenario: Concurrent requests share one build ===

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_build_once() {
    let mut analyzers = Analyzers::healthy();
    analyzers.taint = analyzers.taint.clone().with_delay(Duration::from_millis(200));
    let pipeline: Arc<Pipeline> = Arc::new(memory_pipeline(&analyzers));
    let unit = Arc::new(dao_unit());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = pipeline.clone();
        let unit = unit.clone();
        handles.push(tokio::spawn(async move { pipeline.build(unit).await }));
    }
    let mut reports = Vec::new();
    for handle in handles {
        reports.push(handle.await.unwrap());
    }

    assert_eq!(analyzers.taint.invocations(), 1);
    assert_eq!(analyzers.cpg.invocations(), 1);
    assert_eq!(analyzers.pattern.invocations(), 1);
    let built = reports.iter().filter(|r| r.outcome == CacheOutcome::Built).count();
    assert_eq!(built, 1);
    assert!(reports.iter().all(|r| r.graph.nodes == reports[0].graph.nodes));
    assert_eq!(pipeline.cache().pending(), 0);
}

// === Scenario: Separate stores agree on content ===

#[tokio::test]
async fn separate_stores_build_the_same_fingerprint() {
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();
    let first_store = Arc::new(DirStore::open(first_dir.path()).unwrap());
    let second_store = Arc::new(DirStore::open(second_dir.path()).unwrap());

    let first = pipeline_with(&Analyzers::healthy(), PipelineConfig::default(), first_store.clone())
        .build(Arc::new(dao_unit()))
        .await;
    let second = pipeline_with(&Analyzers::healthy(), PipelineConfig::default(), second_store.clone())
        .build(Arc::new(dao_unit()))
        .await;

    assert_eq!(first.outcome, CacheOutcome::Built);
    assert_eq!(second.outcome, CacheOutcome::Built);
    assert_eq!(first.key, second.key);
    let fingerprint = first.graph.content_fingerprint().unwrap();
    assert_eq!(fingerprint, second.graph.content_fingerprint().unwrap());

    // each store stamps its listing with the same content fingerprint
    for store in [&first_store, &second_store] {
        let listing = std::fs::read_to_string(store.listing_path(&first.key)).unwrap();
        assert_eq!(secgraph::graph::listing_fingerprint(&listing), Some(fingerprint.as_str()));
    }
}
