//! regcache: a persistent query cache for multi-agent regulation research.
//!
//! The research pipeline (planning, web retrieval, validation) is expensive.
//! [`QueryCache`] memoizes its output per normalized query for a configurable
//! TTL, and [`QueryRunner`] wires a [`Pipeline`] through the cache with an
//! explicit force-refresh bypass.
//!
//! ```no_run
//! use std::sync::Arc;
//! use regcache::{CommandPipeline, Config, QueryCache, QueryParams, QueryRunner};
//!
//! # async fn demo() -> regcache::Result<()> {
//! let config = Config::load()?;
//! let cache = Arc::new(QueryCache::open(&config.cache)?);
//! let runner = QueryRunner::new(cache, Box::new(CommandPipeline::new("research", vec![])));
//!
//! let params = QueryParams::new("personal data protection").region("tw");
//! let outcome = runner.execute(&params, false).await?;
//! println!("from cache: {}", outcome.from_cache);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;

pub use cache::{
    compute_key, CacheEntry, CacheKey, CacheStats, CacheSummary, NormalizedQuery, QueryCache,
    QueryParams,
};
pub use config::{CacheConfig, Config};
pub use error::{CacheError, Result};
pub use pipeline::{CommandPipeline, Pipeline, PipelineOutput, QueryOutcome, QueryRunner};
