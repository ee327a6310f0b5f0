//! SQLite index of persisted builds

use super::traits::{StorageError, StorageResult};
use crate::cache::CacheKey;
use crate::graph::FusedGraph;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

/// One row of the build manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub key: String,
    pub unit_id: String,
    /// Enabled tools with their statuses, e.g. `cpg=ok,taint=tool-timeout`
    pub tools: String,
    pub degradation: String,
    pub nodes: usize,
    pub edges: usize,
    pub findings: usize,
    pub built_at: DateTime<Utc>,
}

impl ManifestEntry {
    pub fn from_graph(key: &CacheKey, graph: &FusedGraph) -> Self {
        let tools = graph
            .metadata
            .tools
            .iter()
            .map(|r| format!("{}={}", r.tool, r.status))
            .collect::<Vec<_>>()
            .join(",");
        Self {
            key: key.to_string(),
            unit_id: graph.metadata.unit_id.clone(),
            tools,
            degradation: graph.metadata.degradation.as_str().to_string(),
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            findings: graph.findings().count(),
            built_at: graph.metadata.fused_at,
        }
    }
}

/// Build manifest backed by a single SQLite file.
///
/// Thread-safe via internal mutex on the connection.
pub struct SqliteManifest {
    conn: Mutex<Connection>,
}

impl SqliteManifest {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS builds (
                key TEXT PRIMARY KEY,
                unit_id TEXT NOT NULL,
                tools TEXT NOT NULL,
                degradation TEXT NOT NULL,
                nodes INTEGER NOT NULL,
                edges INTEGER NOT NULL,
                findings INTEGER NOT NULL,
                built_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_builds_unit ON builds(unit_id);

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Insert or replace the entry for `entry.key`.
    pub fn record(&self, entry: &ManifestEntry) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO builds (key, unit_id, tools, degradation, nodes, edges, findings, built_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.key,
                entry.unit_id,
                entry.tools,
                entry.degradation,
                entry.nodes as i64,
                entry.edges as i64,
                entry.findings as i64,
                entry.built_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> StorageResult<Option<ManifestEntry>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT key, unit_id, tools, degradation, nodes, edges, findings, built_at
                 FROM builds WHERE key = ?1",
                params![key],
                Self::raw_row,
            )
            .optional()?;
        row.map(Self::entry_from_raw).transpose()
    }

    pub fn list(&self) -> StorageResult<Vec<ManifestEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT key, unit_id, tools, degradation, nodes, edges, findings, built_at
             FROM builds ORDER BY built_at, key",
        )?;
        let rows = stmt
            .query_map([], Self::raw_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::entry_from_raw).collect()
    }

    pub fn remove(&self, key: &str) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM builds WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
        Ok(RawEntry {
            key: row.get(0)?,
            unit_id: row.get(1)?,
            tools: row.get(2)?,
            degradation: row.get(3)?,
            nodes: row.get(4)?,
            edges: row.get(5)?,
            findings: row.get(6)?,
            built_at: row.get(7)?,
        })
    }

    fn entry_from_raw(raw: RawEntry) -> StorageResult<ManifestEntry> {
        Ok(ManifestEntry {
            key: raw.key,
            unit_id: raw.unit_id,
            tools: raw.tools,
            degradation: raw.degradation,
            nodes: raw.nodes.max(0) as usize,
            edges: raw.edges.max(0) as usize,
            findings: raw.findings.max(0) as usize,
            built_at: DateTime::parse_from_rfc3339(&raw.built_at)
                .map_err(|e| StorageError::DateParse(e.to_string()))?
                .with_timezone(&Utc),
        })
    }
}

struct RawEntry {
    key: String,
    unit_id: String,
    tools: String,
    degradation: String,
    nodes: i64,
    edges: i64,
    findings: i64,
    built_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(key: &str, minute: u32) -> ManifestEntry {
        ManifestEntry {
            key: key.to_string(),
            unit_id: format!("unit-{}", key),
            tools: "cpg=ok,taint=tool-timeout".to_string(),
            degradation: "partial".to_string(),
            nodes: 4,
            edges: 3,
            findings: 1,
            built_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, 0).unwrap(),
        }
    }

    #[test]
    fn record_and_get_round_trip() {
        let manifest = SqliteManifest::open_in_memory().unwrap();
        let e = entry("aa", 0);
        manifest.record(&e).unwrap();
        assert_eq!(manifest.get("aa").unwrap(), Some(e));
        assert_eq!(manifest.get("missing").unwrap(), None);
    }

    #[test]
    fn list_is_oldest_first_and_replace_updates() {
        let manifest = SqliteManifest::open_in_memory().unwrap();
        manifest.record(&entry("bb", 5)).unwrap();
        manifest.record(&entry("aa", 1)).unwrap();
        let mut newer = entry("aa", 9);
        newer.findings = 7;
        manifest.record(&newer).unwrap();

        let keys: Vec<String> = manifest.list().unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["bb", "aa"]);
        assert_eq!(manifest.get("aa").unwrap().unwrap().findings, 7);
        assert!(manifest.remove("bb").unwrap());
        assert!(!manifest.remove("bb").unwrap());
    }

    #[test]
    fn manifest_persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("manifest.db");
        SqliteManifest::open(&path).unwrap().record(&entry("cc", 0)).unwrap();
        let reopened = SqliteManifest::open(&path).unwrap();
        assert_eq!(reopened.list().unwrap().len(), 1);
    }
}
