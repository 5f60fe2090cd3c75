//! Shared constants

/// Default routing key (queue) carrying ingestion events.
pub const DEFAULT_EVENT_QUEUE: &str = "events";

/// Default exchange. The empty exchange routes directly to the queue named by the routing key.
pub const DEFAULT_EXCHANGE: &str = "";

/// Default number of concurrent object-storage calls per ingestion event.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 5;

/// Folder prefix for feed media public ids in object storage.
pub const FEED_MEDIA_FOLDER: &str = "feeds";

/// Content type used for broker message bodies.
pub const EVENT_CONTENT_TYPE: &str = "application/json";
