//! Feed creation and deletion on the request path.
//!
//! Creating a feed commits the feed row, stages the request files and publishes one
//! `upload_feed_medias` event. Uploads happen later in the ingestion worker, so the
//! returned feed never has media yet. If staging or publishing fails the feed row stays
//! (it is valid with zero media) and the files staged for the request are removed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use feedline_broker::EventPublisher;
use feedline_core::models::{Feed, IncomingFile};
use feedline_core::{AppError, ContentData, DeletePayload, IngestionEvent, UploadPayload};
use feedline_db::FeedStore;
use feedline_storage::StagingArea;
use uuid::Uuid;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct FeedIngestionOrchestrator {
    feeds: Arc<dyn FeedStore>,
    staging: StagingArea,
    publisher: EventPublisher,
    request_timeout: Duration,
}

impl FeedIngestionOrchestrator {
    pub fn new(feeds: Arc<dyn FeedStore>, staging: StagingArea, publisher: EventPublisher) -> Self {
        Self {
            feeds,
            staging,
            publisher,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Deadline for staging and publishing one request's files.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    #[tracing::instrument(skip(self, caption, files), fields(user_id = %user_id, files = files.len()))]
    pub async fn create_feed(
        &self,
        user_id: Uuid,
        caption: &str,
        files: &[IncomingFile],
    ) -> Result<Feed, AppError> {
        let feed = self.feeds.create_feed(user_id, caption).await?;

        if files.is_empty() {
            tracing::info!(feed_id = %feed.id, "Feed created without media");
            return Ok(feed);
        }

        let mut staged = Vec::with_capacity(files.len());
        let mut publish_started = false;
        let result = tokio::time::timeout(self.request_timeout, async {
            let content = self.stage_files(feed.id, files, &mut staged).await?;
            publish_started = true;
            self.publish_upload(feed.id, content).await
        })
        .await
        .unwrap_or_else(|_| {
            Err(AppError::Timeout(format!(
                "staging and publishing media for feed {} exceeded {}s",
                feed.id,
                self.request_timeout.as_secs()
            )))
        });

        match result {
            Ok(()) => {}
            // The broker may already hold an event referencing the staged paths. They are
            // left for the worker, or for the staging sweeper if the event was lost.
            Err(e @ AppError::Timeout(_)) if publish_started => {
                tracing::error!(
                    feed_id = %feed.id,
                    staged = staged.len(),
                    "Deadline hit while publishing, leaving staged files in place"
                );
                return Err(e);
            }
            Err(e) => {
                tracing::error!(
                    feed_id = %feed.id,
                    error = %e,
                    staged = staged.len(),
                    "Feed media ingestion was not queued, removing staged files"
                );
                self.staging
                    .remove_all(staged.iter().map(PathBuf::as_path))
                    .await;
                return Err(e);
            }
        }

        tracing::info!(feed_id = %feed.id, files = files.len(), "Feed created, media queued");
        Ok(feed)
    }

    /// Stage every file and describe it for the upload event.
    ///
    /// Paths are pushed to `staged` as soon as they exist so the caller can clean up
    /// even if this future is cancelled by the deadline.
    async fn stage_files(
        &self,
        feed_id: Uuid,
        files: &[IncomingFile],
        staged: &mut Vec<PathBuf>,
    ) -> Result<Vec<ContentData>, AppError> {
        let mut content = Vec::with_capacity(files.len());

        for file in files {
            let staged_file = self.staging.stage(file).await.map_err(|e| {
                tracing::error!(
                    feed_id = %feed_id,
                    filename = %file.original_filename,
                    error = %e,
                    "Failed to stage file"
                );
                AppError::from(e)
            })?;
            staged.push(staged_file.path.clone());

            content.push(ContentData {
                file_path: staged_file.path.to_string_lossy().into_owned(),
                file_type: staged_file.kind.as_str().to_string(),
                content_type: Some(staged_file.content_type),
            });
        }

        Ok(content)
    }

    /// Publish one event referencing every staged file.
    async fn publish_upload(&self, feed_id: Uuid, content: Vec<ContentData>) -> Result<(), AppError> {
        let event = IngestionEvent::UploadFeedMedias(UploadPayload {
            feed_id,
            content,
            attempt: 0,
        });

        self.publisher
            .publish_event(&event)
            .await
            .map_err(|e| AppError::Publish {
                feed_id,
                message: e.to_string(),
            })?;

        Ok(())
    }

    pub async fn get_feed(&self, feed_id: Uuid) -> Result<Feed, AppError> {
        self.feeds
            .get_feed(feed_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Feed {} not found", feed_id)))
    }

    /// Delete a feed and queue removal of its stored objects.
    ///
    /// Returns the number of `delete_feed_medias` events published.
    #[tracing::instrument(skip(self), fields(feed_id = %feed_id, user_id = %user_id))]
    pub async fn delete_feed(&self, feed_id: Uuid, user_id: Uuid) -> Result<usize, AppError> {
        let removed = self.feeds.delete_feed(feed_id, user_id).await?;

        let mut published = 0;
        let mut last_error = None;
        for media in &removed {
            let event = IngestionEvent::DeleteFeedMedias(DeletePayload {
                public_id: media.public_id.clone(),
            });
            match self.publisher.publish_event(&event).await {
                Ok(_) => published += 1,
                Err(e) => {
                    tracing::error!(
                        public_id = %media.public_id,
                        error = %e,
                        "Failed to queue media deletion, object will be orphaned"
                    );
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            return Err(AppError::Publish {
                feed_id,
                message: format!(
                    "{} of {} media deletions not queued: {}",
                    removed.len() - published,
                    removed.len(),
                    e
                ),
            });
        }

        tracing::info!(media = published, "Feed deleted, media deletions queued");
        Ok(published)
    }
}
