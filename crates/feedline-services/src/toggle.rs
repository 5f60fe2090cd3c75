//! Toggle mutations for likes and follows.
//!
//! Check, then delete or insert. Two concurrent toggles on the same pair can both see
//! "absent"; the unique constraint keeps the edge single and the losing insert comes back
//! as a no-op, which is reported as success.

use std::sync::Arc;

use feedline_core::models::{InsertOutcome, RelationKind, ToggleOutcome};
use feedline_core::AppError;
use feedline_db::RelationStore;
use uuid::Uuid;

#[derive(Clone)]
pub struct ToggleMutationEngine {
    relations: Arc<dyn RelationStore>,
}

impl ToggleMutationEngine {
    pub fn new(relations: Arc<dyn RelationStore>) -> Self {
        Self { relations }
    }

    #[tracing::instrument(skip(self), fields(kind = %kind, actor = %actor, target = %target))]
    pub async fn toggle(
        &self,
        kind: RelationKind,
        actor: Uuid,
        target: Uuid,
    ) -> Result<ToggleOutcome, AppError> {
        if kind == RelationKind::UserFollow && actor == target {
            return Err(AppError::InvalidInput(
                "Users cannot follow themselves".to_string(),
            ));
        }

        if self.relations.edge_exists(kind, actor, target).await? {
            if !self.relations.delete_edge(kind, actor, target).await? {
                tracing::debug!("Edge already removed by a concurrent toggle");
            }
            return Ok(ToggleOutcome::Removed);
        }

        match self.relations.insert_edge(kind, actor, target).await? {
            InsertOutcome::Inserted => {}
            InsertOutcome::ConflictNoop => {
                tracing::debug!("Edge inserted by a concurrent toggle");
            }
        }
        Ok(ToggleOutcome::Created)
    }

    pub async fn toggle_like(&self, user_id: Uuid, feed_id: Uuid) -> Result<ToggleOutcome, AppError> {
        self.toggle(RelationKind::FeedLike, user_id, feed_id).await
    }

    pub async fn toggle_follow(
        &self,
        follower_id: Uuid,
        following_id: Uuid,
    ) -> Result<ToggleOutcome, AppError> {
        self.toggle(RelationKind::UserFollow, follower_id, following_id)
            .await
    }
}
