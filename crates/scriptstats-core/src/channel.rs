//! Event Channel abstraction: named topics, consumer groups, at-least-once.

use anyhow::Result;
use async_trait::async_trait;

pub const TOPIC_SCRIPT_STATISTIC: &str = "script.statistic";
pub const TOPIC_SCRIPT_CREATE: &str = "script.create";
pub const TOPIC_SCRIPT_CODE_UPDATE: &str = "script.code.update";
pub const TOPIC_SCRIPT_DELETE: &str = "script.delete";

/// Consumer group that maintains the fast-path counters and durable totals.
pub const GROUP_AGGREGATOR: &str = "aggregator";
/// Consumer group that keeps the search index in step.
pub const GROUP_INDEX: &str = "es";

/// One message handed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-assigned id, stable across redeliveries.
    pub id: String,
    pub topic: String,
    pub payload: Vec<u8>,
    /// 1 on first delivery.
    pub attempt: u32,
}

#[async_trait]
pub trait EventChannel: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Join `group` on `topic`. Every group receives every message published
    /// after it was created; subscriptions within one group share the load.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>>;
}

#[async_trait]
pub trait Subscription: Send + 'static {
    /// Wait for the next delivery. `None` means the channel is closed.
    async fn next(&mut self) -> Result<Option<Delivery>>;

    /// Mark a delivery as processed; it will not be seen again.
    async fn ack(&mut self, delivery: &Delivery) -> Result<()>;

    /// Hand a delivery back for redelivery.
    async fn nack(&mut self, delivery: &Delivery) -> Result<()>;
}
