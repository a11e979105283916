use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Cmd, FromRedisValue};
use tracing::info;

use scriptstats_core::store::CounterStore;

use crate::connection::{sanitize_url, ttl_millis, with_timeout, RedisConfig};

/// [`CounterStore`] backed by native Redis commands.
///
/// One multiplexed connection is shared by every caller; each command runs
/// under the configured deadline.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: MultiplexedConnection,
    timeout: Duration,
}

impl RedisCounterStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = config.client()?;
        let conn = config.connect(&client).await?;
        info!(url = %sanitize_url(&config.url), "Redis counter store connected");
        Ok(Self {
            conn,
            timeout: config.command_timeout,
        })
    }

    async fn run<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let mut conn = self.conn.clone();
        with_timeout(self.timeout, cmd.query_async(&mut conn)).await
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64> {
        let Some(ttl) = ttl else {
            return self.run(redis::cmd("INCR").arg(key)).await;
        };
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .ignore();
        let mut conn = self.conn.clone();
        let (value,): (i64,) = with_timeout(self.timeout, pipe.query_async(&mut conn)).await?;
        Ok(value)
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>> {
        self.run(redis::cmd("GET").arg(key)).await
    }

    async fn get_counters(&self, keys: &[String]) -> Result<Vec<Option<i64>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.run(redis::cmd("MGET").arg(keys)).await
    }

    async fn hincr(&self, key: &str, field: &str) -> Result<i64> {
        self.run(redis::cmd("HINCRBY").arg(key).arg(field).arg(1))
            .await
    }

    async fn hget_counters(&self, key: &str, fields: &[String]) -> Result<Vec<Option<i64>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        self.run(redis::cmd("HMGET").arg(key).arg(fields)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        self.run(&cmd).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run(redis::cmd("GET").arg(key)).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let reply: Option<String> = self
            .run(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_millis(ttl)),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.run(redis::cmd("EXISTS").arg(key)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _: i64 = self.run(redis::cmd("DEL").arg(key)).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let _: i64 = self
            .run(redis::cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)))
            .await?;
        Ok(())
    }

    async fn pf_add(&self, key: &str, element: &str) -> Result<bool> {
        self.run(redis::cmd("PFADD").arg(key).arg(element)).await
    }

    async fn pf_count(&self, key: &str) -> Result<u64> {
        self.run(redis::cmd("PFCOUNT").arg(key)).await
    }

    async fn pf_merge(&self, dest: &str, sources: &[String]) -> Result<()> {
        self.run(redis::cmd("PFMERGE").arg(dest).arg(sources)).await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let _: i64 = self.run(redis::cmd("SADD").arg(key).arg(member)).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.run(redis::cmd("SMEMBERS").arg(key)).await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let _: i64 = self.run(redis::cmd("SREM").arg(key).arg(member)).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let _: String = self.run(&redis::cmd("PING")).await?;
        Ok(())
    }
}
