//! Store traits
//!
//! Services and the ingestion worker depend on these traits rather than on the
//! Postgres repositories, so the in-memory stores can stand in for tests.

use async_trait::async_trait;
use feedline_core::models::{
    Comment, Feed, FeedMedia, InsertOutcome, MediaFailure, NewComment, NewFeedMedia, RelationKind,
};
use feedline_core::AppError;
use uuid::Uuid;

/// What one ingestion write changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    /// Media rows newly inserted.
    pub inserted: usize,
    /// Media rows that already existed for the same `(feed_id, public_id)`.
    pub duplicates: usize,
    pub failures_recorded: usize,
}

#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Insert a feed row. The returned feed has no media.
    async fn create_feed(&self, user_id: Uuid, caption: &str) -> Result<Feed, AppError>;

    /// Fetch a feed together with its media.
    async fn get_feed(&self, feed_id: Uuid) -> Result<Option<Feed>, AppError>;

    async fn feed_exists(&self, feed_id: Uuid) -> Result<bool, AppError>;

    async fn media_exists(&self, feed_id: Uuid, public_id: &str) -> Result<bool, AppError>;

    /// Write the outcome of one ingestion event in a single transaction.
    ///
    /// Media inserts ignore rows that already exist. Fails with `NotFound` when the feed is gone.
    async fn persist_ingestion(
        &self,
        feed_id: Uuid,
        media: &[NewFeedMedia],
        failures: &[MediaFailure],
    ) -> Result<PersistOutcome, AppError>;

    /// Delete a feed owned by `user_id` and return the media rows removed with it.
    async fn delete_feed(&self, feed_id: Uuid, user_id: Uuid) -> Result<Vec<FeedMedia>, AppError>;

    async fn list_failures(&self, feed_id: Uuid) -> Result<Vec<MediaFailure>, AppError>;
}

/// Edges of toggle relations, keyed by `(actor, target)`.
#[async_trait]
pub trait RelationStore: Send + Sync {
    async fn edge_exists(
        &self,
        kind: RelationKind,
        actor: Uuid,
        target: Uuid,
    ) -> Result<bool, AppError>;

    /// Insert the edge; an edge that already exists is `ConflictNoop`, not an error.
    async fn insert_edge(
        &self,
        kind: RelationKind,
        actor: Uuid,
        target: Uuid,
    ) -> Result<InsertOutcome, AppError>;

    /// Delete the edge. Returns whether a row was removed.
    async fn delete_edge(
        &self,
        kind: RelationKind,
        actor: Uuid,
        target: Uuid,
    ) -> Result<bool, AppError>;

    /// Number of stored edges for the pair (0 or 1 while the uniqueness constraint holds).
    async fn count_edges(
        &self,
        kind: RelationKind,
        actor: Uuid,
        target: Uuid,
    ) -> Result<i64, AppError>;
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn create_comment(&self, new: NewComment) -> Result<Comment, AppError>;

    async fn get_comment(&self, comment_id: Uuid) -> Result<Option<Comment>, AppError>;

    async fn list_comments(&self, feed_id: Uuid) -> Result<Vec<Comment>, AppError>;
}
