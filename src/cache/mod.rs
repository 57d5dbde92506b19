//! Query result caching with TTL expiry, forced refresh and JSON persistence.

pub mod key;
pub mod query_cache;
pub mod store;

pub use key::{compute_key, CacheKey, NormalizedQuery, QueryParams};
pub use query_cache::{CacheStats, CacheSummary, QueryCache};
pub use store::CacheEntry;
