//! Ingestion events exchanged between the feed producer and the media worker.
//!
//! Serialized form: `{"event_type": "<type>", "payload": {...}}`. The broker carries the
//! event type as message metadata and the payload as the message body, and
//! [`IngestionEvent::decode`] rebuilds the event from that pair.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Errors raised while decoding an ingestion event.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Malformed {event_type} payload: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Discriminant of an [`IngestionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UploadFeedMedias,
    DeleteFeedMedias,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UploadFeedMedias => "upload_feed_medias",
            EventType::DeleteFeedMedias => "delete_feed_medias",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EventError> {
        match s {
            "upload_feed_medias" => Ok(EventType::UploadFeedMedias),
            "delete_feed_medias" => Ok(EventType::DeleteFeedMedias),
            other => Err(EventError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One staged file awaiting upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentData {
    pub file_path: String,
    /// Declared media kind, e.g. `Image`.
    pub file_type: String,
    /// Declared MIME type of the original upload, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPayload {
    pub feed_id: Uuid,
    pub content: Vec<ContentData>,
    /// Retry generation. Absent on the first publish.
    #[serde(default, skip_serializing_if = "is_first_attempt")]
    pub attempt: u32,
}

fn is_first_attempt(attempt: &u32) -> bool {
    *attempt == 0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePayload {
    pub public_id: String,
}

/// Closed set of ingestion events, tagged by `event_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "snake_case")]
pub enum IngestionEvent {
    UploadFeedMedias(UploadPayload),
    DeleteFeedMedias(DeletePayload),
}

impl IngestionEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            IngestionEvent::UploadFeedMedias(_) => EventType::UploadFeedMedias,
            IngestionEvent::DeleteFeedMedias(_) => EventType::DeleteFeedMedias,
        }
    }

    /// Serialize only the payload (the broker message body).
    pub fn payload_bytes(&self) -> Result<Vec<u8>, EventError> {
        match self {
            IngestionEvent::UploadFeedMedias(p) => serde_json::to_vec(p),
            IngestionEvent::DeleteFeedMedias(p) => serde_json::to_vec(p),
        }
        .map_err(EventError::Encode)
    }

    /// Decode a message body using the event type carried alongside it.
    pub fn decode(event_type: &str, payload: &[u8]) -> Result<Self, EventError> {
        let malformed = |source| EventError::Malformed {
            event_type: event_type.to_string(),
            source,
        };
        match EventType::parse(event_type)? {
            EventType::UploadFeedMedias => serde_json::from_slice(payload)
                .map(IngestionEvent::UploadFeedMedias)
                .map_err(malformed),
            EventType::DeleteFeedMedias => serde_json::from_slice(payload)
                .map(IngestionEvent::DeleteFeedMedias)
                .map_err(malformed),
        }
    }
}
