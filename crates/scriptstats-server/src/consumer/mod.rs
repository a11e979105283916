//! Consumer runtime: pulls deliveries from a [`Subscription`], runs a
//! [`MessageHandler`] and turns the outcome into ack / nack.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use scriptstats_core::channel::{Delivery, EventChannel, Subscription};
use scriptstats_core::config::Config;

pub mod handlers;

pub use handlers::{IndexSyncHandler, LifecycleHandler, StatisticHandler};

#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload can never be processed. Logged and acknowledged.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Infrastructure failure; the message is redelivered.
    #[error(transparent)]
    Transient(#[from] anyhow::Error),
}

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_delivery_attempts,
            backoff: config.retry_backoff(),
        }
    }

    /// Exponential in the attempt number, capped at 16x the base, with up to
    /// 25% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(4);
        let base = self.backoff.saturating_mul(factor);
        let jitter = rand::thread_rng().gen_range(0.0..0.25);
        base.mul_f64(1.0 + jitter)
    }
}

/// What the runtime does with a delivery once the handler returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ack,
    Retry,
    DeadLetter,
    Discard,
}

pub fn decide(result: &Result<(), HandlerError>, attempt: u32, policy: &RetryPolicy) -> Outcome {
    match result {
        Ok(()) => Outcome::Ack,
        Err(HandlerError::Malformed(_)) => Outcome::Discard,
        Err(HandlerError::Transient(_)) if attempt >= policy.max_attempts => Outcome::DeadLetter,
        Err(HandlerError::Transient(_)) => Outcome::Retry,
    }
}

async fn process(
    sub: &mut dyn Subscription,
    handler: &dyn MessageHandler,
    policy: &RetryPolicy,
    group: &str,
    delivery: Delivery,
) -> anyhow::Result<()> {
    let result = handler.handle(&delivery).await;
    match decide(&result, delivery.attempt, policy) {
        Outcome::Ack => sub.ack(&delivery).await,
        Outcome::Discard => {
            if let Err(e) = &result {
                warn!(topic = %delivery.topic, group, id = %delivery.id, error = %e, "discarding poison message");
            }
            sub.ack(&delivery).await
        }
        Outcome::DeadLetter => {
            if let Err(e) = &result {
                error!(
                    topic = %delivery.topic,
                    group,
                    id = %delivery.id,
                    attempt = delivery.attempt,
                    payload = %String::from_utf8_lossy(&delivery.payload),
                    error = %e,
                    "delivery attempts exhausted, dead-lettering message"
                );
            }
            sub.ack(&delivery).await
        }
        Outcome::Retry => {
            let delay = policy.delay_for_attempt(delivery.attempt);
            if let Err(e) = &result {
                warn!(
                    topic = %delivery.topic,
                    group,
                    id = %delivery.id,
                    attempt = delivery.attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "handler failed, scheduling redelivery"
                );
            }
            tokio::time::sleep(delay).await;
            sub.nack(&delivery).await
        }
    }
}

/// Drive one subscription until `shutdown` flips or the channel closes.
pub async fn run_worker(
    mut sub: Box<dyn Subscription>,
    handler: Arc<dyn MessageHandler>,
    policy: RetryPolicy,
    group: String,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let next = tokio::select! {
            _ = shutdown.changed() => break,
            next = sub.next() => next,
        };
        match next {
            Ok(Some(delivery)) => {
                if let Err(e) = process(sub.as_mut(), handler.as_ref(), &policy, &group, delivery).await {
                    error!(group = %group, error = %e, "failed to settle delivery");
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!(group = %group, error = %e, "subscription read failed");
                tokio::time::sleep(policy.backoff).await;
            }
        }
    }
    info!(group = %group, "consumer worker stopped");
}

/// Subscribe `workers` times to `topic` as `group` and spawn a worker per
/// subscription.
pub async fn spawn_group(
    channel: &Arc<dyn EventChannel>,
    topic: &str,
    group: &str,
    handler: Arc<dyn MessageHandler>,
    workers: usize,
    policy: RetryPolicy,
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let sub = channel.subscribe(topic, group).await?;
        handles.push(tokio::spawn(run_worker(
            sub,
            Arc::clone(&handler),
            policy,
            group.to_string(),
            shutdown.clone(),
        )));
    }
    info!(topic, group, workers, "consumer group started");
    Ok(handles)
}
