//! Error types module
//!
//! All service-level errors are unified under [`AppError`]. Each variant maps to one
//! class of the pipeline's failure taxonomy (staging, publish, upload, persistence,
//! not-found) plus the generic input/timeout/internal cases. Layer-specific errors
//! (`StorageError`, `BrokerError`, `StagingError`) are converted at the service boundary.
//!
//! A toggle insert that loses a uniqueness race is not an error at all; see
//! [`crate::models::InsertOutcome::ConflictNoop`].

use std::io;

use sqlx::Error as SqlxError;
use uuid::Uuid;

use crate::events::EventError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
/// by the JSON response layer.
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "PUBLISH_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Staging error: {0}")]
    Staging(String),

    /// The feed row exists but its ingestion event was not enqueued.
    #[error("Failed to publish ingestion event for feed {feed_id}: {message}")]
    Publish { feed_id: Uuid, message: String },

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Database error: {0}")]
    Persistence(#[source] SqlxError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Persistence(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<EventError> for AppError {
    fn from(err: EventError) -> Self {
        AppError::InvalidInput(format!("Event error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, log_level).
fn app_error_static_metadata(err: &AppError) -> (u16, &'static str, bool, LogLevel) {
    match err {
        AppError::Staging(_) => (500, "STAGING_ERROR", true, LogLevel::Error),
        AppError::Publish { .. } => (503, "PUBLISH_ERROR", true, LogLevel::Error),
        AppError::Upload(_) => (502, "UPLOAD_ERROR", true, LogLevel::Warn),
        AppError::Persistence(_) => (500, "DATABASE_ERROR", true, LogLevel::Error),
        AppError::NotFound(_) => (404, "NOT_FOUND", false, LogLevel::Debug),
        AppError::InvalidInput(_) => (400, "INVALID_INPUT", false, LogLevel::Debug),
        AppError::Timeout(_) => (504, "TIMEOUT", true, LogLevel::Warn),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => {
            (500, "INTERNAL_ERROR", true, LogLevel::Error)
        }
    }
}

impl AppError {
    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).3
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Staging(_) => "Failed to store uploaded files".to_string(),
            AppError::Publish { .. } => {
                "Feed was created but its media could not be queued for processing".to_string()
            }
            AppError::Upload(_) => "Failed to upload media".to_string(),
            AppError::Persistence(_) => "Failed to access database".to_string(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::Timeout(_) => "Request timed out".to_string(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_database() {
        let err = AppError::from(sqlx::Error::PoolClosed);
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access database");
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_error_metadata_not_found() {
        let err = AppError::NotFound("comment not found".to_string());
        assert_eq!(err.http_status_code(), 404);
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert!(!err.is_recoverable());
        assert_eq!(err.client_message(), "comment not found");
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn publish_error_is_distinct_and_names_the_feed() {
        let feed_id = Uuid::new_v4();
        let err = AppError::Publish {
            feed_id,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.error_code(), "PUBLISH_ERROR");
        assert!(err.to_string().contains(&feed_id.to_string()));
        assert!(!err.client_message().contains("connection refused"));
    }

    #[test]
    fn detailed_message_includes_source_chain() {
        let err = AppError::from(anyhow::anyhow!("disk full").context("writing staged file"));
        let details = err.detailed_message();
        assert!(details.contains("Caused by"));
    }
}
