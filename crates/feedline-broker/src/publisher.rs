use feedline_core::{BrokerConfig, IngestionEvent};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::BrokerError;
use crate::traits::MessageBroker;

/// Publishes typed ingestion events to a fixed exchange and routing key.
///
/// The message body is the JSON payload; the event type travels as message metadata.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn MessageBroker>,
    exchange: String,
    routing_key: String,
}

impl EventPublisher {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }

    pub fn from_config(broker: Arc<dyn MessageBroker>, config: &BrokerConfig) -> Self {
        Self::new(broker, config.exchange.clone(), config.queue.clone())
    }

    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        &self.broker
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type(), routing_key = %self.routing_key))]
    pub async fn publish_event(&self, event: &IngestionEvent) -> Result<Uuid, BrokerError> {
        let body = event.payload_bytes()?;
        let id = self
            .broker
            .publish(
                &self.exchange,
                &self.routing_key,
                event.event_type().as_str(),
                &body,
            )
            .await?;

        tracing::info!(message_id = %id, "Event published");
        Ok(id)
    }

    /// Publish `event` so that it is delivered no earlier than `delay` from now.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type(), delay_secs = delay.as_secs()))]
    pub async fn publish_event_delayed(
        &self,
        event: &IngestionEvent,
        delay: Duration,
    ) -> Result<Uuid, BrokerError> {
        let body = event.payload_bytes()?;
        let id = self
            .broker
            .publish_delayed(
                &self.exchange,
                &self.routing_key,
                event.event_type().as_str(),
                &body,
                delay,
            )
            .await?;

        tracing::info!(message_id = %id, "Delayed event published");
        Ok(id)
    }
}
