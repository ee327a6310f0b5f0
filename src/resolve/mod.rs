//! Identity resolution: from tool-reported spans to canonical node keys

mod declarations;
mod resolver;

pub use declarations::{scan_declarations, Declaration, DeclarationIndex, DeclarationSource};
pub use resolver::{resolve_span, Ambiguity, IdentityResolver, Resolution};
