//! Connection settings and the per-command deadline shared by the store and
//! the stream channel.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult};

use scriptstats_core::config::Config;

#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis server URL (e.g. `redis://localhost:6379`).
    pub url: String,
    /// Deadline for establishing a connection.
    pub connect_timeout: Duration,
    /// Deadline for every individual command.
    pub command_timeout: Duration,
    /// Approximate `MAXLEN` applied on every `XADD`.
    pub stream_max_len: usize,
    /// Prefix for Redis Streams consumer names. Stable across restarts so a
    /// restarted process replays its own pending entries.
    pub consumer_name: String,
    /// Entries pending on any consumer for at least this long are claimed by
    /// a reader that has drained its own pending list.
    pub claim_min_idle: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(1),
            stream_max_len: 100_000,
            consumer_name: "scriptstats".to_string(),
            claim_min_idle: Duration::from_secs(60),
        }
    }
}

impl RedisConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.redis_url.clone(),
            command_timeout: config.redis_timeout(),
            stream_max_len: config.stream_max_len,
            consumer_name: config.consumer_name.clone(),
            claim_min_idle: config.stream_claim_idle(),
            ..Default::default()
        }
    }

    pub(crate) fn client(&self) -> Result<Client> {
        Client::open(self.url.as_str())
            .with_context(|| format!("invalid redis url {}", sanitize_url(&self.url)))
    }

    /// Open a fresh multiplexed connection.
    pub(crate) async fn connect(&self, client: &Client) -> Result<MultiplexedConnection> {
        with_timeout(
            self.connect_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .with_context(|| format!("connecting to {}", sanitize_url(&self.url)))
    }
}

/// Redact the userinfo part of a Redis URL so credentials never reach logs.
pub fn sanitize_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return "[invalid-url]".to_string();
    };
    let rest = &url[scheme_end + 3..];
    match rest.rfind('@') {
        Some(at) => format!("{}://***@{}", &url[..scheme_end], &rest[at + 1..]),
        None => url.to_string(),
    }
}

/// Await a Redis command under `timeout`.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(anyhow!("redis command timed out after {timeout:?}")),
    }
}

/// Millisecond argument for `PX` / `PEXPIRE`. Never zero, which Redis rejects.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}
