use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use scriptstats_core::channel::{
    Delivery, TOPIC_SCRIPT_CODE_UPDATE, TOPIC_SCRIPT_CREATE, TOPIC_SCRIPT_DELETE,
};
use scriptstats_core::event::{RawEvent, ScriptDeleted, ScriptSnapshot};

use super::{HandlerError, MessageHandler};
use crate::aggregator::Aggregator;
use crate::reconciler::Reconciler;

fn decode_event(delivery: &Delivery) -> Result<RawEvent, HandlerError> {
    RawEvent::decode(&delivery.payload).map_err(|e| HandlerError::Malformed(e.to_string()))
}

/// `aggregator` group on `script.statistic`: fast-path counters, then the
/// durable increment when the event passed the dedup gate.
pub struct StatisticHandler {
    aggregator: Arc<Aggregator>,
    reconciler: Arc<Reconciler>,
}

impl StatisticHandler {
    pub fn new(aggregator: Arc<Aggregator>, reconciler: Arc<Reconciler>) -> Self {
        Self {
            aggregator,
            reconciler,
        }
    }
}

#[async_trait]
impl MessageHandler for StatisticHandler {
    #[tracing::instrument(skip(self, delivery), fields(id = %delivery.id, attempt = delivery.attempt))]
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let event = decode_event(delivery)?;
        let persist = self.aggregator.on_event(&event).await?;
        if persist && event.operation.is_durable() {
            self.reconciler.apply(&event).await?;
            if let Err(e) = self.reconciler.mark_pending(event.script_id).await {
                warn!(script_id = event.script_id, error = %e, "failed to flag script for index sync");
            }
        }
        Ok(())
    }
}

/// `es` group on `script.statistic`: batched statistics sync. Index
/// failures never hold the message back.
pub struct IndexSyncHandler {
    reconciler: Arc<Reconciler>,
}

impl IndexSyncHandler {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl MessageHandler for IndexSyncHandler {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let event = decode_event(delivery)?;
        if let Err(e) = self.reconciler.record_and_maybe_sync(event.script_id).await {
            warn!(script_id = event.script_id, error = %e, "index sync failed");
        }
        Ok(())
    }
}

/// `es` group on the script lifecycle topics: full document replace or
/// delete.
pub struct LifecycleHandler {
    reconciler: Arc<Reconciler>,
}

impl LifecycleHandler {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl MessageHandler for LifecycleHandler {
    #[tracing::instrument(skip(self, delivery), fields(topic = %delivery.topic, id = %delivery.id))]
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        match delivery.topic.as_str() {
            TOPIC_SCRIPT_CREATE | TOPIC_SCRIPT_CODE_UPDATE => {
                let snapshot: ScriptSnapshot = serde_json::from_slice(&delivery.payload)
                    .map_err(|e| HandlerError::Malformed(e.to_string()))?;
                self.reconciler.replace_script(&snapshot).await?;
            }
            TOPIC_SCRIPT_DELETE => {
                let deleted: ScriptDeleted = serde_json::from_slice(&delivery.payload)
                    .map_err(|e| HandlerError::Malformed(e.to_string()))?;
                self.reconciler.delete_script(deleted.script_id).await?;
            }
            other => {
                return Err(HandlerError::Malformed(format!("unexpected topic {other}")));
            }
        }
        Ok(())
    }
}
