//! Toggle relation repository: `feed_likes` and `user_follows`.
//!
//! Both tables carry a unique constraint on the pair; inserts use
//! `ON CONFLICT DO NOTHING` so losing a race is reported as [`InsertOutcome::ConflictNoop`].

use async_trait::async_trait;
use feedline_core::models::{InsertOutcome, RelationKind};
use feedline_core::AppError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::traits::RelationStore;

/// Statements for one relation table. Binds are always `$1 = actor, $2 = target`.
struct RelationSql {
    table: &'static str,
    exists: &'static str,
    insert: &'static str,
    delete: &'static str,
    count: &'static str,
}

const FEED_LIKE_SQL: RelationSql = RelationSql {
    table: "feed_likes",
    exists: "SELECT EXISTS(SELECT 1 FROM feed_likes WHERE user_id = $1 AND feed_id = $2)",
    insert: "INSERT INTO feed_likes (user_id, feed_id) VALUES ($1, $2) ON CONFLICT (feed_id, user_id) DO NOTHING",
    delete: "DELETE FROM feed_likes WHERE user_id = $1 AND feed_id = $2",
    count: "SELECT COUNT(*) FROM feed_likes WHERE user_id = $1 AND feed_id = $2",
};

const USER_FOLLOW_SQL: RelationSql = RelationSql {
    table: "user_follows",
    exists: "SELECT EXISTS(SELECT 1 FROM user_follows WHERE follower_id = $1 AND following_id = $2)",
    insert: "INSERT INTO user_follows (follower_id, following_id) VALUES ($1, $2) ON CONFLICT (follower_id, following_id) DO NOTHING",
    delete: "DELETE FROM user_follows WHERE follower_id = $1 AND following_id = $2",
    count: "SELECT COUNT(*) FROM user_follows WHERE follower_id = $1 AND following_id = $2",
};

fn sql_for(kind: RelationKind) -> &'static RelationSql {
    match kind {
        RelationKind::FeedLike => &FEED_LIKE_SQL,
        RelationKind::UserFollow => &USER_FOLLOW_SQL,
    }
}

#[derive(Clone)]
pub struct RelationRepository {
    pool: PgPool,
}

impl RelationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_reference_error(kind: RelationKind, e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_foreign_key_violation() {
            let what = match kind {
                RelationKind::FeedLike => "Feed or user",
                RelationKind::UserFollow => "User",
            };
            return AppError::NotFound(format!("{} not found", what));
        }
        if db.is_check_violation() {
            return AppError::InvalidInput("Users cannot follow themselves".to_string());
        }
    }
    AppError::Persistence(e)
}

#[async_trait]
impl RelationStore for RelationRepository {
    #[tracing::instrument(skip(self), fields(db.table = sql_for(kind).table))]
    async fn edge_exists(
        &self,
        kind: RelationKind,
        actor: Uuid,
        target: Uuid,
    ) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(sql_for(kind).exists)
            .bind(actor)
            .bind(target)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    #[tracing::instrument(skip(self), fields(db.table = sql_for(kind).table))]
    async fn insert_edge(
        &self,
        kind: RelationKind,
        actor: Uuid,
        target: Uuid,
    ) -> Result<InsertOutcome, AppError> {
        let result = sqlx::query(sql_for(kind).insert)
            .bind(actor)
            .bind(target)
            .execute(&self.pool)
            .await
            .map_err(|e| map_reference_error(kind, e))?;

        if result.rows_affected() == 0 {
            tracing::debug!("Edge already present, insert was a no-op");
            return Ok(InsertOutcome::ConflictNoop);
        }
        Ok(InsertOutcome::Inserted)
    }

    #[tracing::instrument(skip(self), fields(db.table = sql_for(kind).table))]
    async fn delete_edge(
        &self,
        kind: RelationKind,
        actor: Uuid,
        target: Uuid,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(sql_for(kind).delete)
            .bind(actor)
            .bind(target)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_edges(
        &self,
        kind: RelationKind,
        actor: Uuid,
        target: Uuid,
    ) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(sql_for(kind).count)
            .bind(actor)
            .bind(target)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
