use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::channel::{Delivery, EventChannel, Subscription};

struct GroupQueue {
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    /// Deliveries handed to this group and not yet acknowledged.
    in_flight: AtomicUsize,
}

impl GroupQueue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            in_flight: AtomicUsize::new(0),
        }
    }
}

/// In-process [`EventChannel`].
///
/// Each `(topic, group)` pair owns one queue; publishing fans a copy out to
/// every group created so far, and all subscriptions of a group pull from the
/// same queue. Messages published to a topic with no groups are dropped, the
/// same as a Redis stream read with `$`. A nack puts the delivery back at the
/// tail with its attempt counter bumped.
#[derive(Default)]
pub struct MemoryChannel {
    topics: Mutex<HashMap<String, HashMap<String, Arc<GroupQueue>>>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn group(&self, topic: &str, group: &str) -> Arc<GroupQueue> {
        let mut topics = self.topics.lock();
        Arc::clone(
            topics
                .entry(topic.to_string())
                .or_default()
                .entry(group.to_string())
                .or_insert_with(|| Arc::new(GroupQueue::new())),
        )
    }

    /// Unacknowledged deliveries across every group.
    pub fn pending(&self) -> usize {
        let topics = self.topics.lock();
        topics
            .values()
            .flat_map(|groups| groups.values())
            .map(|queue| queue.in_flight.load(Ordering::SeqCst))
            .sum()
    }

    /// Resolve once every published message has been acknowledged by every
    /// group. Callers bound this with a timeout.
    pub async fn wait_idle(&self) {
        while self.pending() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl EventChannel for MemoryChannel {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let groups: Vec<Arc<GroupQueue>> = {
            let topics = self.topics.lock();
            topics
                .get(topic)
                .map(|groups| groups.values().cloned().collect())
                .unwrap_or_default()
        };

        let id = uuid::Uuid::new_v4().to_string();
        for queue in groups {
            queue.in_flight.fetch_add(1, Ordering::SeqCst);
            let delivery = Delivery {
                id: id.clone(),
                topic: topic.to_string(),
                payload: payload.clone(),
                attempt: 1,
            };
            if queue.sender.send(delivery).is_err() {
                queue.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Err(anyhow!("consumer group queue for {topic} is closed"));
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(MemorySubscription {
            queue: self.group(topic, group),
        }))
    }
}

struct MemorySubscription {
    queue: Arc<GroupQueue>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        let mut receiver = self.queue.receiver.lock().await;
        Ok(receiver.recv().await)
    }

    async fn ack(&mut self, _delivery: &Delivery) -> Result<()> {
        self.queue.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery) -> Result<()> {
        let mut redelivery = delivery.clone();
        redelivery.attempt += 1;
        self.queue
            .sender
            .send(redelivery)
            .map_err(|_| anyhow!("consumer group queue for {} is closed", delivery.topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_group_sees_every_message() {
        let channel = MemoryChannel::new();
        let mut a = channel.subscribe("t", "a").await.unwrap();
        let mut b = channel.subscribe("t", "b").await.unwrap();
        channel.publish("t", b"one".to_vec()).await.unwrap();

        let got_a = a.next().await.unwrap().unwrap();
        let got_b = b.next().await.unwrap().unwrap();
        assert_eq!(got_a.payload, b"one");
        assert_eq!(got_a.id, got_b.id);
        assert_eq!(channel.pending(), 2);

        a.ack(&got_a).await.unwrap();
        b.ack(&got_b).await.unwrap();
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn subscriptions_in_one_group_share_messages() {
        let channel = MemoryChannel::new();
        let mut first = channel.subscribe("t", "g").await.unwrap();
        let mut second = channel.subscribe("t", "g").await.unwrap();
        channel.publish("t", b"1".to_vec()).await.unwrap();
        channel.publish("t", b"2".to_vec()).await.unwrap();

        let x = first.next().await.unwrap().unwrap();
        let y = second.next().await.unwrap().unwrap();
        assert_ne!(x.id, y.id);
    }

    #[tokio::test]
    async fn nack_redelivers_with_next_attempt() {
        let channel = MemoryChannel::new();
        let mut sub = channel.subscribe("t", "g").await.unwrap();
        channel.publish("t", b"x".to_vec()).await.unwrap();

        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.attempt, 1);
        sub.nack(&first).await.unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempt, 2);
        assert_eq!(channel.pending(), 1);
    }

    #[tokio::test]
    async fn publish_without_groups_is_dropped() {
        let channel = MemoryChannel::new();
        channel.publish("nobody", b"x".to_vec()).await.unwrap();
        assert_eq!(channel.pending(), 0);
    }
}
