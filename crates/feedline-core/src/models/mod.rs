//! Domain models

pub mod comment;
pub mod feed;
pub mod relation;
pub mod upload;
pub mod user;

pub use comment::{Comment, NewComment};
pub use feed::{media_type_tag, Feed, FeedMedia, MediaFailure, MediaKind, NewFeedMedia};
pub use relation::{InsertOutcome, RelationKind, ToggleOutcome};
pub use upload::IncomingFile;
pub use user::User;
