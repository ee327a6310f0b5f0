//! Content-addressed caching of fused graphs

mod key;
mod manager;

pub use key::CacheKey;
pub use manager::{CacheManager, CacheOutcome, CacheStats};
