//! In-process broker with the delivery semantics of [`crate::PgBroker`].
//!
//! Used by tests and single-process setups. Messages are lost when the process exits.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::BrokerError;
use crate::traits::{requeue_delay, Delivery, MessageBroker};

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(900);
const DEFAULT_MAX_DELIVERIES: i32 = 5;

/// Record of a publish call, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub id: Uuid,
    pub exchange: String,
    pub routing_key: String,
    pub event_type: String,
    pub body: Bytes,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    delivery: Delivery,
    visible_at: Instant,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    in_flight: HashMap<Uuid, StoredMessage>,
    dead: Vec<Delivery>,
    published: Vec<PublishedMessage>,
    fail_publish: bool,
    closed: bool,
}

impl State {
    /// Return expired leases to their queue.
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<Uuid> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.visible_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(message) = self.in_flight.remove(&id) {
                self.queues
                    .entry(message.delivery.queue.clone())
                    .or_default()
                    .push_back(message);
            }
        }
    }
}

pub struct MemoryBroker {
    state: Mutex<State>,
    notify: Notify,
    visibility_timeout: Duration,
    max_deliveries: i32,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_VISIBILITY_TIMEOUT, DEFAULT_MAX_DELIVERIES)
    }

    pub fn with_limits(visibility_timeout: Duration, max_deliveries: i32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            visibility_timeout,
            max_deliveries,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, BrokerError> {
        self.state
            .lock()
            .map_err(|_| BrokerError::Connection("memory broker state poisoned".to_string()))
    }

    fn open_state(&self) -> Result<MutexGuard<'_, State>, BrokerError> {
        let state = self.state()?;
        if state.closed {
            return Err(BrokerError::Closed);
        }
        Ok(state)
    }

    /// Make subsequent publishes fail until reset.
    pub fn set_fail_publish(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_publish = fail;
        }
    }

    /// Every successful publish so far, oldest first.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .map(|s| s.published.clone())
            .unwrap_or_default()
    }

    /// Messages waiting on `queue`, including delayed ones, excluding leased ones.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.queues.get(queue).map_or(0, VecDeque::len))
            .unwrap_or_default()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.in_flight.len())
            .unwrap_or_default()
    }

    pub fn dead_letters(&self) -> Vec<Delivery> {
        self.state
            .lock()
            .map(|s| s.dead.clone())
            .unwrap_or_default()
    }

    /// Make every delayed or backed-off message visible now.
    pub fn release_delayed(&self) {
        if let Ok(mut state) = self.state.lock() {
            let now = Instant::now();
            for queue in state.queues.values_mut() {
                for message in queue.iter_mut() {
                    message.visible_at = message.visible_at.min(now);
                }
            }
        }
        self.notify.notify_waiters();
    }

    /// Expire every outstanding lease, as if the consumers holding them had crashed.
    pub fn expire_leases(&self) {
        if let Ok(mut state) = self.state.lock() {
            for message in state.in_flight.values_mut() {
                message.visible_at = Instant::now();
            }
        }
        self.notify.notify_waiters();
    }

    fn enqueue(
        &self,
        exchange: &str,
        routing_key: &str,
        event_type: &str,
        body: &[u8],
        delay: Duration,
    ) -> Result<Uuid, BrokerError> {
        let mut state = self.open_state()?;
        if state.fail_publish {
            return Err(BrokerError::Publish("broker unavailable".to_string()));
        }

        let id = Uuid::new_v4();
        let body = Bytes::copy_from_slice(body);
        let delivery = Delivery {
            id,
            exchange: exchange.to_string(),
            queue: routing_key.to_string(),
            event_type: event_type.to_string(),
            body: body.clone(),
            delivery_count: 0,
        };

        state
            .queues
            .entry(routing_key.to_string())
            .or_default()
            .push_back(StoredMessage {
                delivery,
                visible_at: Instant::now() + delay,
            });
        state.published.push(PublishedMessage {
            id,
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            event_type: event_type.to_string(),
            body,
            delay,
        });
        drop(state);

        self.notify.notify_waiters();
        Ok(id)
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        event_type: &str,
        body: &[u8],
    ) -> Result<Uuid, BrokerError> {
        self.enqueue(exchange, routing_key, event_type, body, Duration::ZERO)
    }

    async fn publish_delayed(
        &self,
        exchange: &str,
        routing_key: &str,
        event_type: &str,
        body: &[u8],
        delay: Duration,
    ) -> Result<Uuid, BrokerError> {
        self.enqueue(exchange, routing_key, event_type, body, delay)
    }

    async fn receive(&self, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        let mut state = self.open_state()?;
        let now = Instant::now();
        state.reclaim_expired(now);

        loop {
            let next = {
                let Some(pending) = state.queues.get_mut(queue) else {
                    return Ok(None);
                };
                let Some(pos) = pending.iter().position(|m| m.visible_at <= now) else {
                    return Ok(None);
                };
                pending.remove(pos)
            };
            let Some(mut message) = next else {
                return Ok(None);
            };

            message.delivery.delivery_count += 1;
            if message.delivery.delivery_count > self.max_deliveries {
                tracing::warn!(
                    message_id = %message.delivery.id,
                    queue = %queue,
                    delivery_count = message.delivery.delivery_count,
                    "Message exceeded max deliveries, dead-lettering"
                );
                state.dead.push(message.delivery);
                continue;
            }

            message.visible_at = now + self.visibility_timeout;
            let delivery = message.delivery.clone();
            state.in_flight.insert(delivery.id, message);
            return Ok(Some(delivery));
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut state = self.open_state()?;
        if state.in_flight.remove(&delivery.id).is_none() {
            tracing::warn!(message_id = %delivery.id, "Ack for a message that is not leased");
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.open_state()?;
        let Some(mut message) = state.in_flight.remove(&delivery.id) else {
            return Err(BrokerError::UnknownDelivery(delivery.id));
        };

        if requeue {
            message.visible_at = Instant::now() + requeue_delay(message.delivery.delivery_count);
            state
                .queues
                .entry(message.delivery.queue.clone())
                .or_default()
                .push_back(message);
        } else {
            tracing::warn!(message_id = %delivery.id, "Message rejected, dead-lettering");
            state.dead.push(message.delivery);
        }
        Ok(())
    }

    async fn wait_for_message(&self, _queue: &str, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.state()?.closed = true;
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEUE: &str = "events";

    #[tokio::test]
    async fn publish_then_receive_and_ack() {
        let broker = MemoryBroker::new();
        broker
            .publish("", QUEUE, "upload_feed_medias", b"{}")
            .await
            .unwrap();

        let delivery = broker.receive(QUEUE).await.unwrap().unwrap();
        assert_eq!(delivery.event_type, "upload_feed_medias");
        assert_eq!(delivery.delivery_count, 1);
        assert!(broker.receive(QUEUE).await.unwrap().is_none());

        broker.ack(&delivery).await.unwrap();
        assert_eq!(broker.in_flight_count(), 0);
        assert_eq!(broker.ready_count(QUEUE), 0);
    }

    #[tokio::test]
    async fn routing_key_selects_queue() {
        let broker = MemoryBroker::new();
        broker.publish("", "other", "t", b"x").await.unwrap();

        assert!(broker.receive(QUEUE).await.unwrap().is_none());
        assert!(broker.receive("other").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered_after_lease_expiry() {
        let broker = MemoryBroker::new();
        broker.publish("", QUEUE, "t", b"x").await.unwrap();

        let first = broker.receive(QUEUE).await.unwrap().unwrap();
        broker.expire_leases();

        let second = broker.receive(QUEUE).await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.is_redelivery());
    }

    #[tokio::test]
    async fn nack_requeue_backs_off_then_redelivers() {
        let broker = MemoryBroker::new();
        broker.publish("", QUEUE, "t", b"x").await.unwrap();

        let delivery = broker.receive(QUEUE).await.unwrap().unwrap();
        broker.nack(&delivery, true).await.unwrap();
        assert!(broker.receive(QUEUE).await.unwrap().is_none());

        broker.release_delayed();
        let again = broker.receive(QUEUE).await.unwrap().unwrap();
        assert_eq!(again.delivery_count, 2);
    }

    #[tokio::test]
    async fn nack_without_requeue_dead_letters() {
        let broker = MemoryBroker::new();
        broker.publish("", QUEUE, "t", b"x").await.unwrap();

        let delivery = broker.receive(QUEUE).await.unwrap().unwrap();
        broker.nack(&delivery, false).await.unwrap();

        assert_eq!(broker.dead_letters().len(), 1);
        assert!(broker.receive(QUEUE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deliveries_are_bounded() {
        let broker = MemoryBroker::with_limits(Duration::from_secs(60), 2);
        broker.publish("", QUEUE, "t", b"x").await.unwrap();

        for _ in 0..2 {
            broker.receive(QUEUE).await.unwrap().unwrap();
            broker.expire_leases();
        }

        assert!(broker.receive(QUEUE).await.unwrap().is_none());
        assert_eq!(broker.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn delayed_publish_is_invisible_until_due() {
        let broker = MemoryBroker::new();
        broker
            .publish_delayed("", QUEUE, "t", b"x", Duration::from_secs(30))
            .await
            .unwrap();

        assert!(broker.receive(QUEUE).await.unwrap().is_none());
        assert_eq!(broker.published()[0].delay, Duration::from_secs(30));

        broker.release_delayed();
        assert!(broker.receive(QUEUE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failing_and_closed_broker_reject_publish() {
        let broker = MemoryBroker::new();
        broker.set_fail_publish(true);
        assert!(matches!(
            broker.publish("", QUEUE, "t", b"x").await,
            Err(BrokerError::Publish(_))
        ));

        broker.set_fail_publish(false);
        broker.close().await.unwrap();
        assert!(matches!(
            broker.publish("", QUEUE, "t", b"x").await,
            Err(BrokerError::Closed)
        ));
        assert!(broker.published().is_empty());
    }
}
