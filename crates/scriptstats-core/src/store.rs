//! Counter Store abstraction.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// The fast-path key-value store.
///
/// Semantics follow Redis: counters are strings parsed as integers, a missing
/// key reads as `None`, `incr` on a missing key starts from zero, and every
/// call is a single round trip that may fail with a transient error.
///
/// Implementations: `MemoryCounterStore` (in-process, tests and single-node
/// development) and `RedisCounterStore` in `scriptstats-redis`.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Increment a counter. When `ttl` is given the expiry is refreshed on
    /// every call.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64>;

    async fn get_counter(&self, key: &str) -> Result<Option<i64>>;

    /// Batched read; result order matches `keys`.
    async fn get_counters(&self, keys: &[String]) -> Result<Vec<Option<i64>>>;

    async fn hincr(&self, key: &str, field: &str) -> Result<i64>;

    async fn hget_counters(&self, key: &str, fields: &[String]) -> Result<Vec<Option<i64>>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Atomic set-if-absent with expiry. Returns `true` iff this call wrote
    /// the key; across any number of concurrent callers exactly one wins.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Add to a probabilistic set. Returns `true` if the estimate may have
    /// changed.
    async fn pf_add(&self, key: &str, element: &str) -> Result<bool>;

    /// Approximate distinct count; zero for a missing key.
    async fn pf_count(&self, key: &str) -> Result<u64>;

    /// Union `sources` (and any existing `dest`) into `dest`.
    async fn pf_merge(&self, dest: &str, sources: &[String]) -> Result<()>;

    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}
