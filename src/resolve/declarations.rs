//! Declaration index: line ranges of enclosing declarations per file
//!
//! Built from the CPG adapter's declaration nodes when available, otherwise
//! from a brace-matching scan of the unit's source text.

use crate::adapter::{AnalyzerRecord, RecordKind};
use crate::unit::SourceUnit;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

/// Where a declaration index came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclarationSource {
    Cpg,
    SourceScan,
    #[default]
    None,
}

/// A named declaration and the lines it spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    /// Qualified name (`Outer.Inner.method`)
    pub name: String,
    /// Position in source order within the index; lower is declared first
    pub order: usize,
}

impl Declaration {
    pub fn new(file: impl Into<String>, start_line: u32, end_line: u32, name: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            start_line,
            end_line: end_line.max(start_line),
            name: name.into(),
            order: 0,
        }
    }

    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    pub fn width(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line)
    }

    /// Whether `other` lies inside this declaration and is not this declaration.
    fn encloses(&self, other: &Declaration) -> bool {
        if self == other || self.file != other.file {
            return false;
        }
        let covers = self.start_line <= other.start_line && other.end_line <= self.end_line;
        let same_range = self.start_line == other.start_line && self.end_line == other.end_line;
        covers && (!same_range || self.order < other.order)
    }
}

/// Per-file declarations sorted in source order.
#[derive(Debug, Clone, Default)]
pub struct DeclarationIndex {
    by_file: BTreeMap<String, Vec<Declaration>>,
    source: DeclarationSource,
}

impl DeclarationIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Index `decls`, assigning source order. Exact duplicates collapse.
    pub fn from_declarations(decls: impl IntoIterator<Item = Declaration>, source: DeclarationSource) -> Self {
        let mut by_file: BTreeMap<String, Vec<Declaration>> = BTreeMap::new();
        for decl in decls {
            by_file.entry(decl.file.clone()).or_default().push(decl);
        }
        let mut order = 0;
        for decls in by_file.values_mut() {
            decls.sort_by(|a, b| {
                (a.start_line, Reverse(a.end_line), &a.name).cmp(&(b.start_line, Reverse(b.end_line), &b.name))
            });
            decls.dedup_by(|a, b| a.start_line == b.start_line && a.end_line == b.end_line && a.name == b.name);
            for decl in decls.iter_mut() {
                decl.order = order;
                order += 1;
            }
        }
        let source = if order == 0 { DeclarationSource::None } else { source };
        Self { by_file, source }
    }

    /// Declarations carried by CPG node records.
    pub fn from_records(records: &[AnalyzerRecord]) -> Self {
        let decls = records.iter().filter_map(|r| match &r.kind {
            RecordKind::CpgNode {
                declaration: Some(name),
                ..
            } => Some(Declaration::new(&r.span.file, r.span.start_line, r.span.end_line, name)),
            _ => None,
        });
        Self::from_declarations(decls, DeclarationSource::Cpg)
    }

    /// Best-effort declarations from the unit's source text.
    pub fn scan(unit: &SourceUnit) -> Self {
        let decls = unit
            .files()
            .iter()
            .flat_map(|f| scan_declarations(&f.path, &f.text));
        Self::from_declarations(decls, DeclarationSource::SourceScan)
    }

    /// CPG declarations when there are any, else a source scan.
    ///
    /// CPG declarations reported without an end line borrow the extent of
    /// a scanned declaration starting on the same line.
    pub fn build(unit: &SourceUnit, records: &[AnalyzerRecord]) -> Self {
        let cpg = Self::from_records(records);
        let scanned = Self::scan(unit);
        if cpg.is_empty() {
            debug!(unit_id = %unit.id(), declarations = scanned.len(), "declaration index from source scan");
            return scanned;
        }
        let decls = cpg.by_file.into_values().flatten().map(|mut d| {
            if d.start_line == d.end_line {
                if let Some(found) = scanned
                    .declarations(&d.file)
                    .iter()
                    .find(|s| s.start_line == d.start_line && s.end_line > s.start_line)
                {
                    d.end_line = found.end_line;
                }
            }
            d
        });
        Self::from_declarations(decls, DeclarationSource::Cpg)
    }

    pub fn source(&self) -> DeclarationSource {
        self.source
    }

    pub fn len(&self) -> usize {
        self.by_file.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn declarations(&self, file: &str) -> &[Declaration] {
        self.by_file.get(file).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Declaration> {
        self.by_file.values().flatten()
    }

    /// Innermost declaration containing `line`; the later-declared wins
    /// between equal ranges.
    pub fn innermost(&self, file: &str, line: u32) -> Option<&Declaration> {
        self.declarations(file)
            .iter()
            .filter(|d| d.contains_line(line))
            .min_by_key(|d| (d.width(), Reverse(d.order)))
    }

    /// Innermost declaration strictly enclosing `decl`.
    pub fn parent_of(&self, decl: &Declaration) -> Option<&Declaration> {
        self.declarations(&decl.file)
            .iter()
            .filter(|d| d.encloses(decl))
            .min_by_key(|d| (d.width(), Reverse(d.order)))
    }

    /// Declarations whose name is `name` or ends in `.name`.
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Declaration> + 'a {
        self.iter().filter(move |d| {
            d.name == name || d.name.strip_suffix(name).is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

const NOT_DECLARATIONS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "new", "else", "do", "try", "synchronized", "throw",
    "sizeof", "super", "this", "case", "await", "yield", "assert", "foreach", "using", "lock", "with", "when",
    "elif", "match", "loop", "typeof", "delete", "throws",
];

fn type_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:class|interface|enum|record|struct|trait|impl|namespace)\s+([A-Za-z_][A-Za-z0-9_]*)")
            .expect("valid regex")
    })
}

fn callable_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*((?:[A-Za-z_@][\w<>\[\],.?:*&]*\s+)*?)(fn\s+|function\s+|def\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*\(",
        )
        .expect("valid regex")
    })
}

/// Name declared on `line`, if the line opens a declaration.
fn header_name(line: &str) -> Option<String> {
    if let Some(caps) = type_header().captures(line) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }
    let caps = callable_header().captures(line)?;
    let prefix = caps.get(1).map_or("", |m| m.as_str());
    let has_keyword = caps.get(2).is_some();
    let name = caps.get(3)?.as_str();
    if prefix.trim().is_empty() && !has_keyword {
        return None;
    }
    if NOT_DECLARATIONS.contains(&name) || prefix.split_whitespace().any(|t| NOT_DECLARATIONS.contains(&t)) {
        return None;
    }
    Some(name.to_string())
}

/// Blank out comments and string/char literals so braces inside them are ignored.
fn strip_line(line: &str, in_block_comment: &mut bool) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if *in_block_comment {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                *in_block_comment = false;
            }
            out.push(' ');
            continue;
        }
        match c {
            '/' if chars.peek() == Some(&'/') => break,
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                *in_block_comment = true;
                out.push(' ');
            }
            '"' | '\'' => {
                out.push(c);
                while let Some(n) = chars.next() {
                    if n == '\\' {
                        chars.next();
                    } else if n == c {
                        break;
                    }
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

struct Frame {
    /// (qualified name, header line) for frames a declaration opened
    decl: Option<(String, u32)>,
}

/// Scan C-family source for brace-delimited declarations.
pub fn scan_declarations(file: &str, text: &str) -> Vec<Declaration> {
    let mut found = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut pending: Option<(String, u32)> = None;
    let mut in_block_comment = false;
    let mut last_line = 0;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx as u32 + 1;
        last_line = line_no;
        let line = strip_line(raw, &mut in_block_comment);
        if let Some(name) = header_name(&line) {
            pending = Some((name, line_no));
        }
        for c in line.chars() {
            match c {
                '{' => {
                    let decl = pending.take().map(|(name, start)| {
                        let qualified = stack
                            .iter()
                            .filter_map(|f| f.decl.as_ref().map(|(n, _)| n.as_str()))
                            .last()
                            .map_or_else(|| name.clone(), |outer| format!("{}.{}", outer, name));
                        (qualified, start)
                    });
                    stack.push(Frame { decl });
                }
                '}' => {
                    if let Some(Frame { decl: Some((name, start)) }) = stack.pop() {
                        found.push(Declaration::new(file, start, line_no, name));
                    }
                }
                ';' => pending = None,
                _ => {}
            }
        }
    }
    // unbalanced input: close whatever is still open at end of file
    while let Some(frame) = stack.pop() {
        if let Some((name, start)) = frame.decl {
            found.push(Declaration::new(file, start, last_line, name));
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAO: &str = r#"package com.acme;

import java.sql.*;

public class UserDao {
    private Connection conn;

    public User find(String id) throws SQLException {
        // lookup { not a brace }
        String q = "SELECT * FROM users WHERE id = '" + id + "'";
        Statement st = conn.createStatement();
        ResultSet rs = st.executeQuery(q);
        if (rs.next()) {
            return new User(rs.getString(1));
        }
        return null;
    }

    public void remove(String id) {
        run("DELETE }" + id);
    }

    abstract void hook();

    static class Row {
        int size() { return 0; }
    }
}
"#;

    fn names(decls: &[Declaration]) -> Vec<(&str, u32, u32)> {
        decls.iter().map(|d| (d.name.as_str(), d.start_line, d.end_line)).collect()
    }

    #[test]
    fn scan_finds_nested_declarations() {
        let index = DeclarationIndex::from_declarations(
            scan_declarations("UserDao.java", DAO),
            DeclarationSource::SourceScan,
        );
        let decls = index.declarations("UserDao.java");
        assert_eq!(
            names(decls),
            vec![
                ("UserDao", 5, 28),
                ("UserDao.find", 8, 17),
                ("UserDao.remove", 19, 21),
                ("UserDao.Row", 25, 27),
                ("UserDao.Row.size", 26, 26),
            ]
        );
    }

    #[test]
    fn scan_ignores_control_flow_and_prototypes() {
        let decls = scan_declarations("UserDao.java", DAO);
        assert!(decls.iter().all(|d| !d.name.ends_with("if")));
        assert!(decls.iter().all(|d| !d.name.ends_with("hook")));
    }

    #[test]
    fn innermost_prefers_narrowest_range() {
        let index = DeclarationIndex::from_declarations(
            scan_declarations("UserDao.java", DAO),
            DeclarationSource::SourceScan,
        );
        assert_eq!(index.innermost("UserDao.java", 12).unwrap().name, "UserDao.find");
        assert_eq!(index.innermost("UserDao.java", 6).unwrap().name, "UserDao");
        assert!(index.innermost("UserDao.java", 3).is_none());
        assert!(index.innermost("Other.java", 12).is_none());
    }

    #[test]
    fn parent_of_walks_one_level() {
        let index = DeclarationIndex::from_declarations(
            scan_declarations("UserDao.java", DAO),
            DeclarationSource::SourceScan,
        );
        let size = index.named("size").next().unwrap();
        assert_eq!(index.parent_of(size).unwrap().name, "UserDao.Row");
        let class = index.named("UserDao").next().unwrap();
        assert!(index.parent_of(class).is_none());
    }

    #[test]
    fn order_follows_source_position() {
        let index = DeclarationIndex::from_declarations(
            vec![
                Declaration::new("A.java", 20, 30, "A.b"),
                Declaration::new("A.java", 1, 40, "A"),
                Declaration::new("A.java", 5, 15, "A.a"),
                Declaration::new("A.java", 5, 15, "A.a"),
            ],
            DeclarationSource::Cpg,
        );
        let decls = index.declarations("A.java");
        assert_eq!(decls.len(), 3);
        assert_eq!(decls.iter().map(|d| d.order).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(decls[1].name, "A.a");
    }

    #[test]
    fn empty_index_reports_no_source() {
        let index = DeclarationIndex::from_declarations(Vec::new(), DeclarationSource::Cpg);
        assert_eq!(index.source(), DeclarationSource::None);
        assert!(index.is_empty());
    }

    #[test]
    fn build_extends_single_line_cpg_declarations() {
        let unit = SourceUnit::new("u").with_file("UserDao.java", DAO);
        let records = vec![AnalyzerRecord::cpg_declaration(
            crate::adapter::Span::line("UserDao.java", 8),
            "com.acme.UserDao.find",
        )];
        let index = DeclarationIndex::build(&unit, &records);
        assert_eq!(index.source(), DeclarationSource::Cpg);
        let decl = &index.declarations("UserDao.java")[0];
        assert_eq!((decl.start_line, decl.end_line), (8, 17));
        assert_eq!(decl.name, "com.acme.UserDao.find");
    }

    #[test]
    fn build_falls_back_to_scan_without_cpg() {
        let unit = SourceUnit::new("u").with_file("UserDao.java", DAO);
        let index = DeclarationIndex::build(&unit, &[]);
        assert_eq!(index.source(), DeclarationSource::SourceScan);
        assert_eq!(index.len(), 5);
    }
}
