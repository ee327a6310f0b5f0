//! Content-addressed cache keys

use crate::adapter::ToolId;
use crate::unit::SourceUnit;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bumped whenever the graph format or the key layout changes.
const KEY_FORMAT: &str = "secgraph-cache-v2";

/// Hex BLAKE3 digest identifying one (unit content, tool set, tool versions)
/// combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for `unit` analyzed by `tools`, each paired with its version.
    ///
    /// Files are hashed in path order with line endings normalized; tools
    /// are hashed sorted, so neither file nor tool order affects the key.
    /// Every field is length-prefixed so no two inputs share an encoding.
    pub fn compute(unit: &SourceUnit, tools: &[(ToolId, String)]) -> Self {
        let mut hasher = blake3::Hasher::new();
        let mut field = |bytes: &[u8]| {
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };

        field(KEY_FORMAT.as_bytes());
        field(unit.id().as_bytes());

        let mut files: Vec<_> = unit.files().iter().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        field(&(files.len() as u64).to_le_bytes());
        for file in files {
            field(file.path.as_bytes());
            field(canonical_text(&file.text).as_bytes());
        }

        match unit.scope() {
            Some(scope) => {
                field(b"scope");
                field(scope.method.as_deref().unwrap_or_default().as_bytes());
                field(&scope.start_line.unwrap_or(0).to_le_bytes());
                field(&scope.end_line.unwrap_or(0).to_le_bytes());
            }
            None => field(b"no-scope"),
        }

        let mut tools: Vec<&(ToolId, String)> = tools.iter().collect();
        tools.sort();
        field(&(tools.len() as u64).to_le_bytes());
        for (tool, version) in tools {
            field(tool.as_str().as_bytes());
            field(version.as_bytes());
        }

        Self(hasher.finalize().to_hex().to_string())
    }

    /// Accept a previously printed key.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        (text.len() == 64 && text.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()))
            .then(|| Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character directory shard.
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Line endings normalized to `\n`.
fn canonical_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitScope;

    fn versions() -> Vec<(ToolId, String)> {
        vec![(ToolId::Pattern, "1.50.0".into()), (ToolId::Cpg, "2.0.1".into())]
    }

    fn unit(text: &str) -> SourceUnit {
        SourceUnit::new("u1").with_file("A.java", text)
    }

    #[test]
    fn key_is_stable_and_order_independent() {
        let mut reversed = versions();
        reversed.reverse();
        assert_eq!(
            CacheKey::compute(&unit("class A {}"), &versions()),
            CacheKey::compute(&unit("class A {}"), &reversed)
        );

        let ab = SourceUnit::new("u1").with_file("A.java", "a").with_file("B.java", "b");
        let ba = SourceUnit::new("u1").with_file("B.java", "b").with_file("A.java", "a");
        assert_eq!(CacheKey::compute(&ab, &versions()), CacheKey::compute(&ba, &versions()));
    }

    #[test]
    fn every_component_changes_the_key() {
        let base = CacheKey::compute(&unit("class A {}"), &versions());
        assert_ne!(base, CacheKey::compute(&unit("class B {}"), &versions()));
        assert_ne!(base, CacheKey::compute(&unit("class A {}"), &versions()[..1]));

        let mut bumped = versions();
        bumped[0].1 = "1.51.0".into();
        assert_ne!(base, CacheKey::compute(&unit("class A {}"), &bumped));

        let scoped = unit("class A {}").with_scope(UnitScope::method("run"));
        assert_ne!(base, CacheKey::compute(&scoped, &versions()));
    }

    #[test]
    fn line_endings_do_not_change_the_key() {
        assert_eq!(
            CacheKey::compute(&unit("class A {\r\n}\r\n"), &versions()),
            CacheKey::compute(&unit("class A {\n}\n"), &versions())
        );
    }

    #[test]
    fn parse_accepts_only_printed_keys() {
        let key = CacheKey::compute(&unit("x"), &versions());
        assert_eq!(CacheKey::parse(key.as_str()), Some(key.clone()));
        assert_eq!(key.shard().len(), 2);
        assert!(CacheKey::parse("../../etc/passwd").is_none());
        assert!(CacheKey::parse(&key.as_str().to_uppercase()).is_none());
    }
}
