//! Feedline Broker Library
//!
//! At-least-once message delivery for ingestion events.
//!
//! - [`MessageBroker`]: the broker contract (publish, delayed publish, receive, ack, nack, close).
//! - [`PgBroker`]: durable queue stored in the `broker_messages` table, woken via LISTEN/NOTIFY.
//! - [`MemoryBroker`]: in-process broker with the same delivery semantics.
//! - [`EventPublisher`]: typed publishing of [`feedline_core::IngestionEvent`]s.
//!
//! Routing follows the default-exchange convention: the routing key names the queue and the
//! exchange is recorded with each message but not interpreted.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod publisher;
pub mod traits;

pub use error::BrokerError;
pub use memory::{MemoryBroker, PublishedMessage};
pub use postgres::{PgBroker, BROKER_NOTIFY_CHANNEL};
pub use publisher::EventPublisher;
pub use traits::{requeue_delay, Delivery, MessageBroker};
