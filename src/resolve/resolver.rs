//! Location-based identity resolution
//!
//! Maps a tool-reported span to the canonical [`NodeKey`] of the innermost
//! declaration that contains its start line. Spans no declaration contains
//! keep their own range under the file scope.

use super::declarations::{Declaration, DeclarationIndex};
use crate::adapter::{AnalyzerRecord, Span};
use crate::graph::NodeKey;
use tracing::debug;

/// A span that straddled sibling declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ambiguity {
    pub chosen: String,
    /// All straddled declarations in source order, the chosen one included
    pub candidates: Vec<String>,
}

/// The key a span resolved to, plus any ambiguity encountered on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub key: NodeKey,
    pub ambiguity: Option<Ambiguity>,
}

fn declaration_key(decl: &Declaration) -> NodeKey {
    NodeKey::new(&decl.file, decl.start_line, decl.end_line, &decl.name)
}

/// Resolve one span against a declaration index.
///
/// Total and deterministic: every span yields exactly one key, and the same
/// (span, index) pair always yields the same key.
pub fn resolve_span(span: &Span, index: &DeclarationIndex) -> Resolution {
    let Some(innermost) = index.innermost(&span.file, span.start_line) else {
        return Resolution {
            key: NodeKey::file_scope(&span.file, span.start_line, span.end_line),
            ambiguity: None,
        };
    };

    if span.end_line > innermost.end_line {
        let parent = index.parent_of(innermost);
        let mut straddled: Vec<&Declaration> = index
            .declarations(&span.file)
            .iter()
            .filter(|d| {
                d.start_line <= span.end_line
                    && d.end_line >= span.start_line
                    && (*d == innermost || index.parent_of(d) == parent)
            })
            .collect();
        if straddled.len() > 1 {
            straddled.sort_by_key(|d| d.order);
            let chosen = straddled[0];
            debug!(
                span = %span,
                chosen = %chosen.name,
                candidates = straddled.len(),
                "span straddles sibling declarations"
            );
            return Resolution {
                key: declaration_key(chosen),
                ambiguity: Some(Ambiguity {
                    chosen: chosen.name.clone(),
                    candidates: straddled.iter().map(|d| d.name.clone()).collect(),
                }),
            };
        }
    }

    Resolution {
        key: declaration_key(innermost),
        ambiguity: None,
    }
}

/// Resolves records against one unit's declaration index.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    index: DeclarationIndex,
}

impl IdentityResolver {
    pub fn new(index: DeclarationIndex) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &DeclarationIndex {
        &self.index
    }

    /// Key for a record's primary span.
    pub fn resolve(&self, record: &AnalyzerRecord) -> NodeKey {
        self.resolve_span(&record.span).key
    }

    pub fn resolve_span(&self, span: &Span) -> Resolution {
        resolve_span(span, &self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeKind, FILE_SCOPE};
    use crate::resolve::DeclarationSource;

    fn index() -> DeclarationIndex {
        DeclarationIndex::from_declarations(
            vec![
                Declaration::new("UserDao.java", 1, 40, "UserDao"),
                Declaration::new("UserDao.java", 10, 15, "UserDao.find"),
                Declaration::new("UserDao.java", 17, 25, "UserDao.save"),
                Declaration::new("UserDao.java", 19, 21, "UserDao.save.Local"),
            ],
            DeclarationSource::Cpg,
        )
    }

    #[test]
    fn nested_spans_share_the_enclosing_key() {
        let index = index();
        let pattern = resolve_span(&Span::line("UserDao.java", 12), &index);
        let cpg = resolve_span(&Span::new("UserDao.java", 10, 15), &index);
        let hop = resolve_span(&Span::line("UserDao.java", 14), &index);
        assert_eq!(pattern.key, cpg.key);
        assert_eq!(pattern.key, hop.key);
        assert_eq!(pattern.key, NodeKey::new("UserDao.java", 10, 15, "UserDao.find"));
    }

    #[test]
    fn innermost_declaration_wins() {
        let key = resolve_span(&Span::line("UserDao.java", 20), &index()).key;
        assert_eq!(key.scope, "UserDao.save.Local");
    }

    #[test]
    fn unenclosed_span_keeps_its_own_range() {
        let resolution = resolve_span(&Span::new("Other.java", 3, 4), &index());
        assert_eq!(resolution.key, NodeKey::new("Other.java", 3, 4, FILE_SCOPE));
        assert!(resolution.ambiguity.is_none());
    }

    #[test]
    fn straddling_siblings_pick_first_declared() {
        let resolution = resolve_span(&Span::new("UserDao.java", 14, 18), &index());
        assert_eq!(resolution.key.scope, "UserDao.find");
        let ambiguity = resolution.ambiguity.unwrap();
        assert_eq!(ambiguity.chosen, "UserDao.find");
        assert_eq!(ambiguity.candidates, vec!["UserDao.find".to_string(), "UserDao.save".to_string()]);
    }

    #[test]
    fn span_running_into_parent_is_not_ambiguous() {
        // starts in find, ends in the class body between methods
        let resolution = resolve_span(&Span::new("UserDao.java", 14, 16), &index());
        assert_eq!(resolution.key.scope, "UserDao.find");
        assert!(resolution.ambiguity.is_none());
    }

    #[test]
    fn resolution_is_deterministic() {
        let index = index();
        let span = Span::new("UserDao.java", 14, 18);
        let first = resolve_span(&span, &index);
        for _ in 0..10 {
            assert_eq!(resolve_span(&span, &index), first);
        }
    }

    #[test]
    fn resolver_resolves_record_primary_span() {
        let resolver = IdentityResolver::new(index());
        let record = AnalyzerRecord::cpg_node(Span::line("UserDao.java", 11), NodeKind::Expression);
        assert_eq!(resolver.resolve(&record).scope, "UserDao.find");
    }
}
