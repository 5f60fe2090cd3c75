//! Feedline Core Library
//!
//! Domain models, ingestion event types, error taxonomy and configuration shared
//! by every Feedline component.

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod models;

// Re-export commonly used types
pub use config::{
    BrokerConfig, Config, DatabaseConfig, IngestionConfig, StagingConfig, StorageBackend,
    StorageConfig, WorkerConfig,
};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use events::{ContentData, DeletePayload, EventError, EventType, IngestionEvent, UploadPayload};
