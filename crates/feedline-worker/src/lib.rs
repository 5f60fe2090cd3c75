//! Feedline ingestion worker
//!
//! Consumes `upload_feed_medias` and `delete_feed_medias` events from the broker, uploads
//! staged files to object storage and records the resulting media rows.

pub mod consumer;
pub mod ingestion;
pub mod telemetry;

pub use consumer::{process_delivery, ConsumerConfig, DeliveryOutcome, IngestionConsumer};
pub use ingestion::{retry_backoff, IngestionReport, MediaIngestionWorker};
