use feedline_core::{AppError, EventError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Unknown or expired delivery: {0}")]
    UnknownDelivery(Uuid),

    #[error("Broker is closed")]
    Closed,

    #[error("Broker database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Event(#[from] EventError),
}

impl From<BrokerError> for AppError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Event(e) => AppError::InvalidInput(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}
