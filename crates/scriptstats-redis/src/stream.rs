//! [`EventChannel`] on Redis Streams.
//!
//! Each topic is one stream and each consumer group a native Redis consumer
//! group, so every group sees every message and the members of a group share
//! the load. A message stays in the consumer's pending entries list until it
//! is acknowledged; a nack or a failed read leaves it there and the next read
//! replays the pending list before asking for new entries.
//!
//! Entries stranded on a consumer that never comes back are moved over with
//! `XAUTOCLAIM` once they have been idle for `claim_min_idle`, then replayed
//! like any other pending entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadReply};
use redis::{Client, Value};
use tracing::{debug, info};

use scriptstats_core::channel::{Delivery, EventChannel, Subscription};

use crate::connection::{sanitize_url, with_timeout, RedisConfig};

const PAYLOAD_FIELD: &str = "payload";

/// How long one `XREADGROUP` blocks waiting for new entries.
const READ_BLOCK: Duration = Duration::from_millis(200);

/// Upper bound on entries moved by one `XAUTOCLAIM`.
const CLAIM_BATCH: usize = 16;

pub fn stream_key(topic: &str) -> String {
    format!("stream:{topic}")
}

fn consumer_name(prefix: &str, group: &str, n: usize) -> String {
    format!("{prefix}-{group}-{n}")
}

fn is_busy_group(err: &anyhow::Error) -> bool {
    err.to_string().contains("BUSYGROUP")
}

/// Number of entry ids in an `XAUTOCLAIM ... JUSTID` reply
/// (`[next-cursor, [id, ...], [deleted-id, ...]]`).
fn claimed_count(reply: &[Value]) -> usize {
    match reply.get(1) {
        Some(Value::Array(ids)) => ids.len(),
        _ => 0,
    }
}

/// Decides where the next `XREADGROUP` starts and when to look for entries
/// abandoned by other consumers.
#[derive(Debug)]
struct ReadCursor {
    /// Read this consumer's pending list (`0`) instead of new entries (`>`).
    replay_pending: bool,
    last_claim: Option<Instant>,
    claim_every: Duration,
}

impl ReadCursor {
    fn new(claim_every: Duration) -> Self {
        Self {
            replay_pending: true,
            last_claim: None,
            claim_every,
        }
    }

    fn start_id(&self) -> &'static str {
        if self.replay_pending {
            "0"
        } else {
            ">"
        }
    }

    /// Claims run only once the own pending list is drained.
    fn claim_due(&self, now: Instant) -> bool {
        !self.replay_pending
            && self
                .last_claim
                .map_or(true, |at| now.duration_since(at) >= self.claim_every)
    }

    fn claimed(&mut self, now: Instant, any: bool) {
        self.last_claim = Some(now);
        if any {
            self.replay_pending = true;
        }
    }

    fn drained(&mut self) {
        self.replay_pending = false;
    }

    /// After a nack or a failed read the entry in flight may still be
    /// pending on this consumer.
    fn failed(&mut self) {
        self.replay_pending = true;
    }
}

pub struct RedisStreamChannel {
    client: Client,
    conn: MultiplexedConnection,
    config: RedisConfig,
    subscriptions: AtomicUsize,
}

impl RedisStreamChannel {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = config.client()?;
        let conn = config.connect(&client).await?;
        info!(url = %sanitize_url(&config.url), "Redis stream channel connected");
        Ok(Self {
            client,
            conn,
            config: config.clone(),
            subscriptions: AtomicUsize::new(0),
        })
    }

    /// Create the consumer group (and the stream) if missing. New groups
    /// start at the end of the stream.
    async fn ensure_group(&self, key: &str, group: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: Result<()> = with_timeout(
            self.config.command_timeout,
            redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(key)
                .arg(group)
                .arg("$")
                .arg("MKSTREAM")
                .query_async(&mut conn),
        )
        .await;
        match created {
            Ok(()) => {
                info!(stream = key, group, "consumer group created");
                Ok(())
            }
            Err(e) if is_busy_group(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl EventChannel for RedisStreamChannel {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let mut conn = self.conn.clone();
        let id: String = with_timeout(
            self.config.command_timeout,
            redis::cmd("XADD")
                .arg(stream_key(topic))
                .arg("MAXLEN")
                .arg("~")
                .arg(self.config.stream_max_len)
                .arg("*")
                .arg(PAYLOAD_FIELD)
                .arg(payload)
                .query_async(&mut conn),
        )
        .await?;
        debug!(topic, id = %id, "published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>> {
        let key = stream_key(topic);
        self.ensure_group(&key, group).await?;

        // Blocking reads would stall every other caller on a shared
        // multiplexed connection.
        let conn = self.config.connect(&self.client).await?;
        let n = self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let consumer = consumer_name(&self.config.consumer_name, group, n);
        info!(topic, group, consumer = %consumer, "subscribed");

        Ok(Box::new(RedisStreamSubscription {
            conn,
            topic: topic.to_string(),
            key,
            group: group.to_string(),
            consumer,
            timeout: self.config.command_timeout,
            claim_min_idle: self.config.claim_min_idle,
            cursor: ReadCursor::new(self.config.claim_min_idle / 2),
            attempts: HashMap::new(),
        }))
    }
}

pub struct RedisStreamSubscription {
    conn: MultiplexedConnection,
    topic: String,
    key: String,
    group: String,
    consumer: String,
    timeout: Duration,
    claim_min_idle: Duration,
    cursor: ReadCursor,
    /// Delivery count per pending entry id, as seen by this consumer.
    attempts: HashMap<String, u32>,
}

impl RedisStreamSubscription {
    async fn read_one(&mut self) -> Result<Option<StreamId>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1);
        let start = self.cursor.start_id();
        if start == ">" {
            cmd.arg("BLOCK").arg(READ_BLOCK.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(&self.key).arg(start);

        let reply: Option<StreamReadReply> =
            with_timeout(self.timeout + READ_BLOCK, cmd.query_async(&mut self.conn)).await?;
        Ok(reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|k| k.ids.into_iter().next()))
    }

    /// Move entries idle on other consumers into this consumer's pending
    /// list. Returns how many were claimed.
    async fn claim_idle(&mut self) -> Result<usize> {
        let reply: Vec<Value> = with_timeout(
            self.timeout,
            redis::cmd("XAUTOCLAIM")
                .arg(&self.key)
                .arg(&self.group)
                .arg(&self.consumer)
                .arg(self.claim_min_idle.as_millis() as u64)
                .arg("0-0")
                .arg("COUNT")
                .arg(CLAIM_BATCH)
                .arg("JUSTID")
                .query_async(&mut self.conn),
        )
        .await?;
        Ok(claimed_count(&reply))
    }

    fn attempt_for(&mut self, id: &str, replayed: bool) -> u32 {
        let attempt = self.attempts.entry(id.to_string()).or_insert(0);
        // An entry replayed from the pending list with no local history was
        // delivered before a restart or claimed from another consumer.
        if replayed && *attempt == 0 {
            *attempt = 1;
        }
        *attempt += 1;
        *attempt
    }
}

#[async_trait]
impl Subscription for RedisStreamSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            let now = Instant::now();
            if self.cursor.claim_due(now) {
                match self.claim_idle().await {
                    Ok(claimed) => {
                        if claimed > 0 {
                            info!(topic = %self.topic, consumer = %self.consumer, claimed, "claimed idle entries");
                        }
                        self.cursor.claimed(now, claimed > 0);
                    }
                    Err(e) => {
                        self.cursor.claimed(now, false);
                        return Err(e.context("claiming idle entries"));
                    }
                }
                continue;
            }

            let replayed = self.cursor.replay_pending;
            let entry = match self.read_one().await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    // Pending list drained; switch to new entries.
                    self.cursor.drained();
                    continue;
                }
                Err(e) => {
                    // The reply may have been lost after Redis delivered the
                    // entry, which leaves it pending on this consumer.
                    self.cursor.failed();
                    return Err(e);
                }
            };
            let attempt = self.attempt_for(&entry.id, replayed);
            let payload: Vec<u8> = entry.get(PAYLOAD_FIELD).unwrap_or_default();
            return Ok(Some(Delivery {
                id: entry.id,
                topic: self.topic.clone(),
                payload,
                attempt,
            }));
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<()> {
        let _: i64 = with_timeout(
            self.timeout,
            redis::cmd("XACK")
                .arg(&self.key)
                .arg(&self.group)
                .arg(&delivery.id)
                .query_async(&mut self.conn),
        )
        .await?;
        self.attempts.remove(&delivery.id);
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery) -> Result<()> {
        debug!(topic = %self.topic, id = %delivery.id, "left pending for redelivery");
        self.cursor.failed();
        Ok(())
    }
}
