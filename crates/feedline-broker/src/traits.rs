use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use uuid::Uuid;

use crate::error::BrokerError;

/// Upper bound for the delay applied when a delivery is nacked with requeue.
pub const MAX_REQUEUE_DELAY_SECS: u64 = 60;

/// Delay before a nacked message becomes visible again: `2^(deliveries-1)` seconds, capped.
pub fn requeue_delay(delivery_count: i32) -> Duration {
    let exp = delivery_count.saturating_sub(1).clamp(0, 16) as u32;
    Duration::from_secs(2_u64.pow(exp).min(MAX_REQUEUE_DELAY_SECS))
}

/// A message handed to a consumer. It stays leased to that consumer until acked or nacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: Uuid,
    pub exchange: String,
    pub queue: String,
    pub event_type: String,
    pub body: Bytes,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: i32,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Durable at-least-once broker.
///
/// Publishing is synchronous from the caller's point of view: `Ok` means the message is
/// persisted. Consumers must ack only after all side effects of a delivery are complete;
/// a delivery that is neither acked nor nacked becomes visible again once its lease expires.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a persistent message routed to the queue named by `routing_key`.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        event_type: &str,
        body: &[u8],
    ) -> Result<Uuid, BrokerError>;

    /// Publish a message that becomes visible to consumers after `delay`.
    async fn publish_delayed(
        &self,
        exchange: &str,
        routing_key: &str,
        event_type: &str,
        body: &[u8],
        delay: Duration,
    ) -> Result<Uuid, BrokerError>;

    /// Lease the next visible message on `queue`, if any.
    async fn receive(&self, queue: &str) -> Result<Option<Delivery>, BrokerError>;

    /// Remove a delivered message for good.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Give a delivery back. With `requeue` it is redelivered after a backoff, otherwise it is
    /// dead-lettered.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError>;

    /// Wait until a message may be available on `queue`, or at most `max_wait`.
    async fn wait_for_message(&self, _queue: &str, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }

    /// Stop accepting work. Further calls fail with [`BrokerError::Closed`].
    async fn close(&self) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requeue_delay_grows_and_caps() {
        assert_eq!(requeue_delay(1), Duration::from_secs(1));
        assert_eq!(requeue_delay(2), Duration::from_secs(2));
        assert_eq!(requeue_delay(4), Duration::from_secs(8));
        assert_eq!(requeue_delay(30), Duration::from_secs(MAX_REQUEUE_DELAY_SECS));
        assert_eq!(requeue_delay(0), Duration::from_secs(1));
    }
}
