use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A post. Visible as soon as it is created; media are attached asynchronously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: Uuid,
    pub user_id: Uuid,
    pub caption: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub medias: Vec<FeedMedia>,
}

/// A media file attached to a feed after a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedMedia {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub url: String,
    /// Object storage identifier, unique per feed.
    pub public_id: String,
    /// Coarse type tag, e.g. `image`.
    #[serde(rename = "type")]
    pub media_type: String,
    pub created_at: DateTime<Utc>,
}

/// Media row to insert for an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFeedMedia {
    pub url: String,
    pub public_id: String,
    pub media_type: String,
}

/// Terminal upload failure recorded once retries are exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFailure {
    pub file_path: String,
    pub file_type: String,
    pub error: String,
    pub attempts: u32,
}

/// Declared media kind carried in ingestion events (`file_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    File,
}

impl MediaKind {
    /// Classify a MIME type by its top-level segment.
    pub fn from_content_type(content_type: &str) -> Self {
        match media_type_tag(content_type).as_str() {
            "image" => MediaKind::Image,
            "video" => MediaKind::Video,
            "audio" => MediaKind::Audio,
            _ => MediaKind::File,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "Image",
            MediaKind::Video => "Video",
            MediaKind::Audio => "Audio",
            MediaKind::File => "File",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse type tag of a MIME type: the segment before `/`, lowercased.
///
/// `image/png` -> `image`, `VIDEO/mp4` -> `video`, `` -> `` (caller decides a fallback).
pub fn media_type_tag(content_type: &str) -> String {
    content_type
        .split('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
