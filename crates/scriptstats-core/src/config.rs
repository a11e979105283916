use std::time::Duration;

use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub duckdb_memory_limit: String,
    pub backend: Backend,
    pub redis_url: String,
    pub redis_timeout_ms: u64,
    pub stream_max_len: usize,
    /// `None` disables the search index (writes go to `NullSearchIndex`).
    pub es_url: Option<String>,
    pub es_index: String,
    pub timezone: Tz,
    pub consumer_workers: usize,
    /// Redis Streams consumer prefix. Defaults to the hostname so a restarted
    /// container picks its own pending entries back up.
    pub consumer_name: String,
    pub stream_claim_idle_ms: u64,
    pub max_delivery_attempts: u32,
    pub retry_backoff_ms: u64,
    pub publish_timeout_ms: u64,
    pub publish_max_in_flight: usize,
    pub index_sync_batch: i64,
    pub index_sync_interval_secs: u64,
}

/// Where the Counter Store and Event Channel live.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    /// In-process store and channel. Single node only; state is lost on exit.
    Memory,
    Redis,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            port: std::env::var("SCRIPTSTATS_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            data_dir: std::env::var("SCRIPTSTATS_DATA_DIR")
                .unwrap_or_else(|_| "./data".to_string()),
            duckdb_memory_limit: std::env::var("SCRIPTSTATS_DUCKDB_MEMORY")
                .unwrap_or_else(|_| "1GB".to_string()),
            backend: {
                let raw = std::env::var("SCRIPTSTATS_BACKEND")
                    .unwrap_or_else(|_| "memory".to_string());
                match raw.as_str() {
                    "redis" => Backend::Redis,
                    _ => Backend::Memory,
                }
            },
            redis_url: std::env::var("SCRIPTSTATS_REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            redis_timeout_ms: env_or("SCRIPTSTATS_REDIS_TIMEOUT_MS", 1000),
            stream_max_len: env_or("SCRIPTSTATS_STREAM_MAX_LEN", 100_000),
            es_url: std::env::var("SCRIPTSTATS_ES_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            es_index: std::env::var("SCRIPTSTATS_ES_INDEX")
                .unwrap_or_else(|_| "scripts".to_string()),
            timezone: {
                let raw = std::env::var("SCRIPTSTATS_TIMEZONE")
                    .unwrap_or_else(|_| "UTC".to_string());
                raw.parse::<Tz>()
                    .map_err(|_| format!("invalid timezone: {raw}"))?
            },
            consumer_workers: env_or("SCRIPTSTATS_CONSUMER_WORKERS", 2usize).max(1),
            consumer_name: ["SCRIPTSTATS_CONSUMER_NAME", "HOSTNAME"]
                .into_iter()
                .filter_map(|name| std::env::var(name).ok())
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
                .unwrap_or_else(|| "scriptstats".to_string()),
            stream_claim_idle_ms: env_or("SCRIPTSTATS_STREAM_CLAIM_IDLE_MS", 60_000u64).max(1),
            max_delivery_attempts: env_or("SCRIPTSTATS_MAX_DELIVERY_ATTEMPTS", 5u32).max(1),
            retry_backoff_ms: env_or("SCRIPTSTATS_RETRY_BACKOFF_MS", 500),
            publish_timeout_ms: env_or("SCRIPTSTATS_PUBLISH_TIMEOUT_MS", 1000),
            publish_max_in_flight: env_or("SCRIPTSTATS_PUBLISH_MAX_IN_FLIGHT", 1024usize).max(1),
            index_sync_batch: env_or("SCRIPTSTATS_INDEX_SYNC_BATCH", 50i64).max(1),
            index_sync_interval_secs: env_or("SCRIPTSTATS_INDEX_SYNC_INTERVAL_SECS", 300u64).max(1),
        })
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn stream_claim_idle(&self) -> Duration {
        Duration::from_millis(self.stream_claim_idle_ms)
    }

    pub fn index_sync_interval(&self) -> Duration {
        Duration::from_secs(self.index_sync_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            data_dir: "./data".to_string(),
            duckdb_memory_limit: "1GB".to_string(),
            backend: Backend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_timeout_ms: 1000,
            stream_max_len: 100_000,
            es_url: None,
            es_index: "scripts".to_string(),
            timezone: Tz::UTC,
            consumer_workers: 2,
            consumer_name: "scriptstats".to_string(),
            stream_claim_idle_ms: 60_000,
            max_delivery_attempts: 5,
            retry_backoff_ms: 500,
            publish_timeout_ms: 1000,
            publish_max_in_flight: 1024,
            index_sync_batch: 50,
            index_sync_interval_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The only test that touches the process environment, so nothing races it.
    #[test]
    fn from_env_clamps_zero_intervals_and_names_the_consumer() {
        std::env::set_var("SCRIPTSTATS_INDEX_SYNC_INTERVAL_SECS", "0");
        std::env::set_var("SCRIPTSTATS_STREAM_CLAIM_IDLE_MS", "0");
        std::env::set_var("SCRIPTSTATS_CONSUMER_NAME", "  ");
        std::env::set_var("HOSTNAME", "web-7");

        let config = Config::from_env().unwrap();
        assert_eq!(config.index_sync_interval(), Duration::from_secs(1));
        assert_eq!(config.stream_claim_idle(), Duration::from_millis(1));
        // A blank override falls through to the hostname.
        assert_eq!(config.consumer_name, "web-7");

        std::env::set_var("SCRIPTSTATS_CONSUMER_NAME", "node-a");
        assert_eq!(Config::from_env().unwrap().consumer_name, "node-a");

        for name in [
            "SCRIPTSTATS_INDEX_SYNC_INTERVAL_SECS",
            "SCRIPTSTATS_STREAM_CLAIM_IDLE_MS",
            "SCRIPTSTATS_CONSUMER_NAME",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn default_interval_is_usable_by_tokio() {
        assert!(Config::default().index_sync_interval() > Duration::ZERO);
    }
}
