//! Feed repository: feeds, their media rows and terminal failure markers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedline_core::models::{Feed, FeedMedia, MediaFailure, NewFeedMedia};
use feedline_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::db::transaction::{with_transaction, TransactionGuard};
use crate::traits::{FeedStore, PersistOutcome};

/// Row type for feeds table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct FeedRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub caption: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeedRow {
    pub fn into_feed(self, medias: Vec<FeedMedia>) -> Feed {
        Feed {
            id: self.id,
            user_id: self.user_id,
            caption: self.caption,
            created_at: self.created_at,
            updated_at: self.updated_at,
            medias,
        }
    }
}

/// Row type for feed_media table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct FeedMediaRow {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub url: String,
    pub public_id: String,
    #[sqlx(rename = "type")]
    pub media_type: String,
    pub created_at: DateTime<Utc>,
}

impl From<FeedMediaRow> for FeedMedia {
    fn from(row: FeedMediaRow) -> Self {
        FeedMedia {
            id: row.id,
            feed_id: row.feed_id,
            url: row.url,
            public_id: row.public_id,
            media_type: row.media_type,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MediaFailureRow {
    file_path: String,
    file_type: String,
    error: String,
    attempts: i32,
}

impl From<MediaFailureRow> for MediaFailure {
    fn from(row: MediaFailureRow) -> Self {
        MediaFailure {
            file_path: row.file_path,
            file_type: row.file_type,
            error: row.error,
            attempts: row.attempts.max(0) as u32,
        }
    }
}

#[derive(Clone)]
pub struct FeedRepository {
    pool: PgPool,
}

impl FeedRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn list_media(&self, feed_id: Uuid) -> Result<Vec<FeedMedia>, AppError> {
        let rows = sqlx::query_as::<Postgres, FeedMediaRow>(
            r#"
            SELECT id, feed_id, url, public_id, type, created_at
            FROM feed_media
            WHERE feed_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FeedMedia::from).collect())
    }
}

#[async_trait]
impl FeedStore for FeedRepository {
    #[tracing::instrument(skip(self, caption), fields(db.table = "feeds"))]
    async fn create_feed(&self, user_id: Uuid, caption: &str) -> Result<Feed, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool, "create_feed").await?;

        let row = sqlx::query_as::<Postgres, FeedRow>(
            r#"
            INSERT INTO feeds (id, user_id, caption)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, caption, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(caption)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_foreign_key_violation() {
                    return AppError::NotFound(format!("User {} not found", user_id));
                }
            }
            AppError::Persistence(e)
        })?;

        tx.commit().await?;

        tracing::info!(feed_id = %row.id, user_id = %user_id, "Feed created");
        Ok(row.into_feed(Vec::new()))
    }

    #[tracing::instrument(skip(self), fields(db.table = "feeds", db.record_id = %feed_id))]
    async fn get_feed(&self, feed_id: Uuid) -> Result<Option<Feed>, AppError> {
        let row = sqlx::query_as::<Postgres, FeedRow>(
            "SELECT id, user_id, caption, created_at, updated_at FROM feeds WHERE id = $1",
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let medias = self.list_media(feed_id).await?;
                Ok(Some(row.into_feed(medias)))
            }
            None => Ok(None),
        }
    }

    async fn feed_exists(&self, feed_id: Uuid) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM feeds WHERE id = $1)")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn media_exists(&self, feed_id: Uuid, public_id: &str) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM feed_media WHERE feed_id = $1 AND public_id = $2)",
        )
        .bind(feed_id)
        .bind(public_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    #[tracing::instrument(
        skip(self, media, failures),
        fields(db.table = "feed_media", feed_id = %feed_id, media = media.len(), failures = failures.len())
    )]
    async fn persist_ingestion(
        &self,
        feed_id: Uuid,
        media: &[NewFeedMedia],
        failures: &[MediaFailure],
    ) -> Result<PersistOutcome, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool, "persist_ingestion").await?;

        // Holds off a concurrent feed delete until this transaction ends.
        let feed: Option<Uuid> = sqlx::query_scalar("SELECT id FROM feeds WHERE id = $1 FOR SHARE")
            .bind(feed_id)
            .fetch_optional(&mut **tx)
            .await?;
        if feed.is_none() {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("Feed {} not found", feed_id)));
        }

        let mut outcome = PersistOutcome::default();

        for item in media {
            let result = sqlx::query(
                r#"
                INSERT INTO feed_media (id, feed_id, url, public_id, type)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (feed_id, public_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(feed_id)
            .bind(&item.url)
            .bind(&item.public_id)
            .bind(&item.media_type)
            .execute(&mut **tx)
            .await?;

            if result.rows_affected() == 0 {
                outcome.duplicates += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        for failure in failures {
            let result = sqlx::query(
                r#"
                INSERT INTO feed_media_failures (id, feed_id, file_path, file_type, error, attempts)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (feed_id, file_path) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(feed_id)
            .bind(&failure.file_path)
            .bind(&failure.file_type)
            .bind(&failure.error)
            .bind(failure.attempts as i32)
            .execute(&mut **tx)
            .await?;

            outcome.failures_recorded += result.rows_affected() as usize;
        }

        tx.commit().await?;

        tracing::debug!(
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            failures_recorded = outcome.failures_recorded,
            "Ingestion results persisted"
        );
        Ok(outcome)
    }

    #[tracing::instrument(skip(self), fields(db.table = "feeds", db.record_id = %feed_id))]
    async fn delete_feed(&self, feed_id: Uuid, user_id: Uuid) -> Result<Vec<FeedMedia>, AppError> {
        let removed = with_transaction(&self.pool, |tx| {
            Box::pin(async move {
                let owner: Option<Uuid> =
                    sqlx::query_scalar("SELECT user_id FROM feeds WHERE id = $1 FOR UPDATE")
                        .bind(feed_id)
                        .fetch_optional(&mut **tx)
                        .await?;

                match owner {
                    Some(owner) if owner == user_id => {}
                    _ => return Err(AppError::NotFound(format!("Feed {} not found", feed_id))),
                }

                let media = sqlx::query_as::<Postgres, FeedMediaRow>(
                    r#"
                    SELECT id, feed_id, url, public_id, type, created_at
                    FROM feed_media
                    WHERE feed_id = $1
                    ORDER BY created_at, id
                    "#,
                )
                .bind(feed_id)
                .fetch_all(&mut **tx)
                .await?;

                // feed_media, likes, comments and failure markers cascade.
                sqlx::query("DELETE FROM feeds WHERE id = $1")
                    .bind(feed_id)
                    .execute(&mut **tx)
                    .await?;

                Ok(media.into_iter().map(FeedMedia::from).collect::<Vec<_>>())
            })
        })
        .await?;

        tracing::info!(feed_id = %feed_id, media = removed.len(), "Feed deleted");
        Ok(removed)
    }

    async fn list_failures(&self, feed_id: Uuid) -> Result<Vec<MediaFailure>, AppError> {
        let rows = sqlx::query_as::<Postgres, MediaFailureRow>(
            r#"
            SELECT file_path, file_type, error, attempts
            FROM feed_media_failures
            WHERE feed_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MediaFailure::from).collect())
    }
}
