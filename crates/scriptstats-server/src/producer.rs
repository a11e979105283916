use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use scriptstats_core::channel::{
    EventChannel, TOPIC_SCRIPT_CODE_UPDATE, TOPIC_SCRIPT_CREATE, TOPIC_SCRIPT_DELETE,
    TOPIC_SCRIPT_STATISTIC,
};
use scriptstats_core::error::CoreError;
use scriptstats_core::event::{RawEvent, ScriptDeleted, ScriptSnapshot};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("encode message: {0}")]
    Encode(#[from] CoreError),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("event channel: {0}")]
    Channel(#[source] anyhow::Error),
}

/// Request-path side of the pipeline.
///
/// Serialises one message and hands it to the [`EventChannel`]. Never touches
/// the Counter Store and never waits for aggregation.
pub struct StatisticsProducer {
    channel: Arc<dyn EventChannel>,
    timeout: Duration,
    in_flight: Arc<Semaphore>,
}

impl StatisticsProducer {
    pub fn new(channel: Arc<dyn EventChannel>, timeout: Duration, max_in_flight: usize) -> Self {
        Self {
            channel,
            timeout,
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
        }
    }

    /// Publish one statistics event under the configured deadline.
    pub async fn publish(&self, event: &RawEvent) -> Result<(), PublishError> {
        let payload = event.encode()?;
        self.send(TOPIC_SCRIPT_STATISTIC, payload).await?;
        debug!(
            script_id = event.script_id,
            operation = %event.operation,
            "statistics event published"
        );
        Ok(())
    }

    /// Publish on a detached task and return immediately.
    ///
    /// At most `max_in_flight` publishes run at once; beyond that the event
    /// is dropped and `false` is returned. Failures are only logged.
    pub fn spawn_publish(self: &Arc<Self>, event: RawEvent) -> bool {
        let Ok(permit) = Arc::clone(&self.in_flight).try_acquire_owned() else {
            warn!(
                script_id = event.script_id,
                operation = %event.operation,
                "publish queue saturated, statistics event dropped"
            );
            return false;
        };
        let producer = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = producer.publish(&event).await {
                warn!(
                    script_id = event.script_id,
                    operation = %event.operation,
                    error = %e,
                    "statistics event dropped"
                );
            }
        });
        true
    }

    pub async fn publish_script_created(&self, snapshot: &ScriptSnapshot) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(snapshot).map_err(CoreError::from)?;
        self.send(TOPIC_SCRIPT_CREATE, payload).await
    }

    pub async fn publish_code_updated(&self, snapshot: &ScriptSnapshot) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(snapshot).map_err(CoreError::from)?;
        self.send(TOPIC_SCRIPT_CODE_UPDATE, payload).await
    }

    pub async fn publish_script_deleted(&self, script_id: i64) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(&ScriptDeleted { script_id }).map_err(CoreError::from)?;
        self.send(TOPIC_SCRIPT_DELETE, payload).await
    }

    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        match tokio::time::timeout(self.timeout, self.channel.publish(topic, payload)).await {
            Ok(result) => result.map_err(PublishError::Channel),
            Err(_) => Err(PublishError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use scriptstats_core::channel::{Subscription, GROUP_AGGREGATOR};
    use scriptstats_core::event::Operation;
    use scriptstats_core::memory::MemoryChannel;

    fn event() -> RawEvent {
        RawEvent {
            script_id: 1,
            script_code_id: 2,
            user_id: 3,
            ip: "10.0.0.1".to_string(),
            user_agent: "ua".to_string(),
            visitor_token: "tok".to_string(),
            operation: Operation::Download,
            time: Utc::now(),
        }
    }

    /// A channel whose publish never completes.
    struct StuckChannel;

    #[async_trait]
    impl EventChannel for StuckChannel {
        async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn subscribe(&self, _topic: &str, _group: &str) -> anyhow::Result<Box<dyn Subscription>> {
            anyhow::bail!("not supported")
        }
    }

    #[tokio::test]
    async fn publish_puts_one_message_on_the_statistics_topic() {
        let channel = Arc::new(MemoryChannel::new());
        let mut sub = channel
            .subscribe(TOPIC_SCRIPT_STATISTIC, GROUP_AGGREGATOR)
            .await
            .unwrap();
        let producer = StatisticsProducer::new(channel.clone(), Duration::from_secs(1), 4);

        let sent = event();
        producer.publish(&sent).await.unwrap();

        let delivery = sub.next().await.unwrap().unwrap();
        assert_eq!(delivery.topic, TOPIC_SCRIPT_STATISTIC);
        assert_eq!(RawEvent::decode(&delivery.payload).unwrap(), sent);
        assert_eq!(channel.pending(), 1);
    }

    #[tokio::test]
    async fn publish_surfaces_deadline() {
        let producer = StatisticsProducer::new(Arc::new(StuckChannel), Duration::from_millis(10), 4);
        let err = producer.publish(&event()).await.unwrap_err();
        assert!(matches!(err, PublishError::Timeout(_)));
    }

    #[tokio::test]
    async fn spawn_publish_drops_when_saturated() {
        let producer = Arc::new(StatisticsProducer::new(
            Arc::new(StuckChannel),
            Duration::from_secs(60),
            1,
        ));
        assert!(producer.spawn_publish(event()));
        assert!(!producer.spawn_publish(event()));
    }

    #[tokio::test]
    async fn lifecycle_messages_use_their_own_topics() {
        let channel = Arc::new(MemoryChannel::new());
        let mut deletes = channel.subscribe(TOPIC_SCRIPT_DELETE, "es").await.unwrap();
        let producer = StatisticsProducer::new(channel.clone(), Duration::from_secs(1), 4);

        producer.publish_script_deleted(42).await.unwrap();

        let delivery = deletes.next().await.unwrap().unwrap();
        let body: ScriptDeleted = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(body.script_id, 42);
    }
}
