//! In-memory implementation of every store trait.
//!
//! Mirrors the Postgres constraints that the services rely on: unique `(feed_id, public_id)`
//! media, unique relation pairs, cascade on feed delete. Each call locks the state once, so
//! a check followed by a write from another call is not atomic, same as two SQL statements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedline_core::models::{
    Comment, Feed, FeedMedia, InsertOutcome, MediaFailure, NewComment, NewFeedMedia, RelationKind,
};
use feedline_core::AppError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::traits::{CommentStore, FeedStore, PersistOutcome, RelationStore};

#[derive(Debug, Clone)]
struct FeedRecord {
    user_id: Uuid,
    caption: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    feeds: HashMap<Uuid, FeedRecord>,
    media: Vec<FeedMedia>,
    failures: HashMap<Uuid, Vec<MediaFailure>>,
    edges: HashSet<(RelationKind, Uuid, Uuid)>,
    comments: Vec<Comment>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with a persistence error until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("memory store state poisoned".to_string()))
    }

    fn check_writable(&self) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Persistence(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    pub fn media_for(&self, feed_id: Uuid) -> Vec<FeedMedia> {
        self.state()
            .map(|s| {
                s.media
                    .iter()
                    .filter(|m| m.feed_id == feed_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn feed_count(&self) -> usize {
        self.state().map(|s| s.feeds.len()).unwrap_or_default()
    }
}

#[async_trait]
impl FeedStore for MemoryStore {
    async fn create_feed(&self, user_id: Uuid, caption: &str) -> Result<Feed, AppError> {
        self.check_writable()?;
        let now = Utc::now();
        let id = Uuid::new_v4();
        let record = FeedRecord {
            user_id,
            caption: caption.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.state()?.feeds.insert(id, record);

        Ok(Feed {
            id,
            user_id,
            caption: caption.to_string(),
            created_at: now,
            updated_at: now,
            medias: Vec::new(),
        })
    }

    async fn get_feed(&self, feed_id: Uuid) -> Result<Option<Feed>, AppError> {
        let state = self.state()?;
        Ok(state.feeds.get(&feed_id).map(|record| Feed {
            id: feed_id,
            user_id: record.user_id,
            caption: record.caption.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            medias: state
                .media
                .iter()
                .filter(|m| m.feed_id == feed_id)
                .cloned()
                .collect(),
        }))
    }

    async fn feed_exists(&self, feed_id: Uuid) -> Result<bool, AppError> {
        Ok(self.state()?.feeds.contains_key(&feed_id))
    }

    async fn media_exists(&self, feed_id: Uuid, public_id: &str) -> Result<bool, AppError> {
        Ok(self
            .state()?
            .media
            .iter()
            .any(|m| m.feed_id == feed_id && m.public_id == public_id))
    }

    async fn persist_ingestion(
        &self,
        feed_id: Uuid,
        media: &[NewFeedMedia],
        failures: &[MediaFailure],
    ) -> Result<PersistOutcome, AppError> {
        self.check_writable()?;
        let mut state = self.state()?;
        if !state.feeds.contains_key(&feed_id) {
            return Err(AppError::NotFound(format!("Feed {} not found", feed_id)));
        }

        let mut outcome = PersistOutcome::default();
        let now = Utc::now();

        for item in media {
            let exists = state
                .media
                .iter()
                .any(|m| m.feed_id == feed_id && m.public_id == item.public_id);
            if exists {
                outcome.duplicates += 1;
                continue;
            }
            state.media.push(FeedMedia {
                id: Uuid::new_v4(),
                feed_id,
                url: item.url.clone(),
                public_id: item.public_id.clone(),
                media_type: item.media_type.clone(),
                created_at: now,
            });
            outcome.inserted += 1;
        }

        let recorded = state.failures.entry(feed_id).or_default();
        for failure in failures {
            if recorded.iter().any(|f| f.file_path == failure.file_path) {
                continue;
            }
            recorded.push(failure.clone());
            outcome.failures_recorded += 1;
        }

        Ok(outcome)
    }

    async fn delete_feed(&self, feed_id: Uuid, user_id: Uuid) -> Result<Vec<FeedMedia>, AppError> {
        self.check_writable()?;
        let mut state = self.state()?;

        match state.feeds.get(&feed_id) {
            Some(record) if record.user_id == user_id => {}
            _ => return Err(AppError::NotFound(format!("Feed {} not found", feed_id))),
        }

        state.feeds.remove(&feed_id);
        state.failures.remove(&feed_id);
        state
            .edges
            .retain(|(kind, _, target)| !(*kind == RelationKind::FeedLike && *target == feed_id));
        state.comments.retain(|c| c.feed_id != feed_id);

        let (removed, kept): (Vec<FeedMedia>, Vec<FeedMedia>) = std::mem::take(&mut state.media)
            .into_iter()
            .partition(|m| m.feed_id == feed_id);
        state.media = kept;

        Ok(removed)
    }

    async fn list_failures(&self, feed_id: Uuid) -> Result<Vec<MediaFailure>, AppError> {
        Ok(self
            .state()?
            .failures
            .get(&feed_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl RelationStore for MemoryStore {
    async fn edge_exists(
        &self,
        kind: RelationKind,
        actor: Uuid,
        target: Uuid,
    ) -> Result<bool, AppError> {
        tokio::task::yield_now().await;
        Ok(self.state()?.edges.contains(&(kind, actor, target)))
    }

    async fn insert_edge(
        &self,
        kind: RelationKind,
        actor: Uuid,
        target: Uuid,
    ) -> Result<InsertOutcome, AppError> {
        tokio::task::yield_now().await;
        self.check_writable()?;
        if kind == RelationKind::UserFollow && actor == target {
            return Err(AppError::InvalidInput(
                "Users cannot follow themselves".to_string(),
            ));
        }

        if self.state()?.edges.insert((kind, actor, target)) {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::ConflictNoop)
        }
    }

    async fn delete_edge(
        &self,
        kind: RelationKind,
        actor: Uuid,
        target: Uuid,
    ) -> Result<bool, AppError> {
        tokio::task::yield_now().await;
        self.check_writable()?;
        Ok(self.state()?.edges.remove(&(kind, actor, target)))
    }

    async fn count_edges(
        &self,
        kind: RelationKind,
        actor: Uuid,
        target: Uuid,
    ) -> Result<i64, AppError> {
        Ok(i64::from(
            self.state()?.edges.contains(&(kind, actor, target)),
        ))
    }
}

#[async_trait]
impl CommentStore for MemoryStore {
    async fn create_comment(&self, new: NewComment) -> Result<Comment, AppError> {
        self.check_writable()?;
        let mut state = self.state()?;
        if !state.feeds.contains_key(&new.feed_id) {
            return Err(AppError::NotFound(format!("Feed {} not found", new.feed_id)));
        }
        if let Some(parent_id) = new.parent_id {
            if !state.comments.iter().any(|c| c.id == parent_id) {
                return Err(AppError::NotFound(format!("Comment {} not found", parent_id)));
            }
        }

        let comment = Comment {
            id: Uuid::new_v4(),
            feed_id: new.feed_id,
            user_id: new.user_id,
            parent_id: new.parent_id,
            comment: new.comment,
            created_at: Utc::now(),
        };
        state.comments.push(comment.clone());
        Ok(comment)
    }

    async fn get_comment(&self, comment_id: Uuid) -> Result<Option<Comment>, AppError> {
        Ok(self
            .state()?
            .comments
            .iter()
            .find(|c| c.id == comment_id)
            .cloned())
    }

    async fn list_comments(&self, feed_id: Uuid) -> Result<Vec<Comment>, AppError> {
        Ok(self
            .state()?
            .comments
            .iter()
            .filter(|c| c.feed_id == feed_id)
            .cloned()
            .collect())
    }
}
