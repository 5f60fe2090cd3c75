use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedline_core::models::{Comment, NewComment};
use feedline_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::traits::CommentStore;

/// Row type for feed_comments table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct CommentRow {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub user_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Comment {
            id: row.id,
            feed_id: row.feed_id,
            user_id: row.user_id,
            parent_id: row.parent_id,
            comment: row.comment,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct CommentRepository {
    pool: PgPool,
}

impl CommentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommentStore for CommentRepository {
    #[tracing::instrument(skip(self, new), fields(db.table = "feed_comments", feed_id = %new.feed_id))]
    async fn create_comment(&self, new: NewComment) -> Result<Comment, AppError> {
        let row = sqlx::query_as::<Postgres, CommentRow>(
            r#"
            INSERT INTO feed_comments (id, feed_id, user_id, parent_id, comment)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, feed_id, user_id, parent_id, comment, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.feed_id)
        .bind(new.user_id)
        .bind(new.parent_id)
        .bind(&new.comment)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_foreign_key_violation() {
                    return AppError::NotFound("Feed, user or parent comment not found".to_string());
                }
            }
            AppError::Persistence(e)
        })?;

        Ok(row.into())
    }

    #[tracing::instrument(skip(self), fields(db.table = "feed_comments", db.record_id = %comment_id))]
    async fn get_comment(&self, comment_id: Uuid) -> Result<Option<Comment>, AppError> {
        let row = sqlx::query_as::<Postgres, CommentRow>(
            r#"
            SELECT id, feed_id, user_id, parent_id, comment, created_at
            FROM feed_comments
            WHERE id = $1
            "#,
        )
        .bind(comment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Comment::from))
    }

    async fn list_comments(&self, feed_id: Uuid) -> Result<Vec<Comment>, AppError> {
        let rows = sqlx::query_as::<Postgres, CommentRow>(
            r#"
            SELECT id, feed_id, user_id, parent_id, comment, created_at
            FROM feed_comments
            WHERE feed_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Comment::from).collect())
    }
}
