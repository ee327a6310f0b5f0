//! Shared fixtures for pipeline scenario tests
//!
//! A small Java DAO unit with a SQL injection in `find`, canned records for
//! each analyzer in terms of that unit, and a pipeline wired to scripted
//! adapters over an in-memory store.

#![allow(dead_code)]

use secgraph::adapter::{attr, AnalyzerRecord, ScriptedAdapter, Span, ToolId};
use secgraph::{ArtifactStore, MemoryStore, Pipeline, PipelineConfig, Severity, SourceUnit};
use std::sync::Arc;

pub const DAO_FILE: &str = "app/UserDao.java";

/// Declarations the source scan finds in [`DAO_SOURCE`]:
/// `UserDao` 6-20, `UserDao.find` 10-15, `UserDao.audit` 17-19.
pub const DAO_SOURCE: &str = "package app;

import java.sql.Connection;
import java.sql.ResultSet;

public class UserDao {
    private final Connection conn;

    // lookup by name
    public ResultSet find(String name) throws Exception {
        String q = \"SELECT * FROM users WHERE name = '\" + name + \"'\";
        ResultSet rs = conn.createStatement().executeQuery(q);
        audit(name);
        return rs;
    }

    private void audit(String who) {
        System.out.println(who);
    }
}
";

pub fn dao_unit() -> SourceUnit {
    SourceUnit::new("dao-1").with_file(DAO_FILE, DAO_SOURCE)
}

/// Same unit with `text` substituted for line 12.
pub fn dao_unit_with_line_12(text: &str) -> SourceUnit {
    let source: Vec<&str> = DAO_SOURCE
        .lines()
        .enumerate()
        .map(|(i, line)| if i == 11 { text } else { line })
        .collect();
    SourceUnit::new("dao-1").with_file(DAO_FILE, source.join("\n") + "\n")
}

/// CPG view: the `find` declaration only.
pub fn cpg_records() -> Vec<AnalyzerRecord> {
    vec![AnalyzerRecord::cpg_declaration(Span::new(DAO_FILE, 10, 15), "UserDao.find")]
}

/// Taint view: parameter on line 10 reaches the query on line 14.
pub fn taint_records() -> Vec<AnalyzerRecord> {
    vec![AnalyzerRecord::taint_path(
        Span::line(DAO_FILE, 14),
        vec![Span::line(DAO_FILE, 10), Span::line(DAO_FILE, 14)],
    )
    .with_rule_id("java/sql-injection")
    .with_severity(Severity::High)]
}

/// Pattern view: string-built query on line 12.
pub fn pattern_records() -> Vec<AnalyzerRecord> {
    vec![AnalyzerRecord::pattern_match(Span::line(DAO_FILE, 12), "java.sqli.string-concat")
        .with_severity(Severity::High)
        .with_message("SQL query built by string concatenation")
        .with_attribute(attr::CWE, "CWE-89")]
}

/// One scripted adapter per tool, answering with the canned records.
pub struct Analyzers {
    pub cpg: ScriptedAdapter,
    pub taint: ScriptedAdapter,
    pub pattern: ScriptedAdapter,
}

impl Analyzers {
    pub fn healthy() -> Self {
        Self {
            cpg: ScriptedAdapter::new(ToolId::Cpg).with_records(cpg_records()),
            taint: ScriptedAdapter::new(ToolId::Taint).with_records(taint_records()),
            pattern: ScriptedAdapter::new(ToolId::Pattern).with_records(pattern_records()),
        }
    }

    pub fn total_invocations(&self) -> usize {
        self.cpg.invocations() + self.taint.invocations() + self.pattern.invocations()
    }
}

pub fn pipeline_with(analyzers: &Analyzers, config: PipelineConfig, store: Arc<dyn ArtifactStore>) -> Pipeline {
    Pipeline::new(config, store)
        .with_adapter(Arc::new(analyzers.cpg.clone()))
        .with_adapter(Arc::new(analyzers.taint.clone()))
        .with_adapter(Arc::new(analyzers.pattern.clone()))
}

/// Pipeline over `analyzers` with default config and a fresh memory store.
pub fn memory_pipeline(analyzers: &Analyzers) -> Pipeline {
    pipeline_with(analyzers, PipelineConfig::default(), Arc::new(MemoryStore::new()))
}
