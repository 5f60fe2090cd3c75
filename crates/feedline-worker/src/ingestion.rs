//! Handlers for ingestion events.
//!
//! An `upload_feed_medias` delivery is processed in four steps: read the staged files,
//! upload them through the [`BoundedUploader`], commit media rows and terminal failures in
//! one transaction, then remove the staged files that no longer need a retry. Any error
//! returned from [`MediaIngestionWorker::handle`] means the delivery must not be acked.
//!
//! Redelivery is safe: public ids are derived from the staged file name, uploads overwrite,
//! and media rows are inserted with `ON CONFLICT DO NOTHING`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use feedline_broker::EventPublisher;
use feedline_core::models::{MediaFailure, NewFeedMedia};
use feedline_core::{
    AppError, ContentData, DeletePayload, IngestionConfig, IngestionEvent, UploadPayload,
};
use feedline_db::FeedStore;
use feedline_storage::{
    feed_media_public_id, BoundedUploader, DeleteOutcome, StagingArea, StagingError,
    UploadRequest,
};
use tokio::sync::mpsc;
use uuid::Uuid;

const MISSING_STAGED_FILE: &str = "staged file missing";

/// Delay before retry generation `attempt`: `2^attempt` seconds, capped.
pub fn retry_backoff(attempt: u32, cap_secs: u64) -> Duration {
    Duration::from_secs(2_u64.saturating_pow(attempt).min(cap_secs))
}

/// Completion signal for one `upload_feed_medias` delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    pub feed_id: Uuid,
    pub uploaded: usize,
    /// Items re-published for another attempt.
    pub retried: usize,
    /// Items recorded as terminal failures.
    pub failed: usize,
    /// Items already ingested by an earlier delivery, or dropped because the feed is gone.
    pub skipped: usize,
}

pub struct MediaIngestionWorker {
    feeds: Arc<dyn FeedStore>,
    staging: StagingArea,
    uploader: BoundedUploader,
    publisher: EventPublisher,
    max_attempts: u32,
    retry_backoff_cap_secs: u64,
    reports: Option<mpsc::Sender<IngestionReport>>,
}

impl MediaIngestionWorker {
    pub fn new(
        feeds: Arc<dyn FeedStore>,
        staging: StagingArea,
        uploader: BoundedUploader,
        publisher: EventPublisher,
        config: &IngestionConfig,
    ) -> Self {
        Self {
            feeds,
            staging,
            uploader,
            publisher,
            max_attempts: config.max_attempts.max(1),
            retry_backoff_cap_secs: config.retry_backoff_cap_secs,
            reports: None,
        }
    }

    /// Also send every [`IngestionReport`] on `reports`.
    pub fn with_reports(mut self, reports: mpsc::Sender<IngestionReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub async fn handle(&self, event: IngestionEvent) -> Result<(), AppError> {
        match event {
            IngestionEvent::UploadFeedMedias(payload) => {
                let report = self.ingest(payload).await?;
                self.emit(report).await;
                Ok(())
            }
            IngestionEvent::DeleteFeedMedias(payload) => self.delete_media(payload).await,
        }
    }

    #[tracing::instrument(
        skip(self, payload),
        fields(feed_id = %payload.feed_id, files = payload.content.len(), attempt = payload.attempt)
    )]
    pub async fn ingest(&self, payload: UploadPayload) -> Result<IngestionReport, AppError> {
        let feed_id = payload.feed_id;
        let attempts_made = payload.attempt + 1;

        if !self.feeds.feed_exists(feed_id).await? {
            tracing::warn!("Feed no longer exists, discarding staged media");
            self.discard_staged(&payload.content).await;
            return Ok(IngestionReport {
                feed_id,
                skipped: payload.content.len(),
                ..Default::default()
            });
        }

        let mut report = IngestionReport {
            feed_id,
            ..Default::default()
        };
        let mut failures: Vec<MediaFailure> = Vec::new();
        // Items handed to the uploader, aligned with the request indexes.
        let mut pending: Vec<&ContentData> = Vec::new();
        let mut requests = Vec::new();

        for item in &payload.content {
            let path = PathBuf::from(&item.file_path);
            let public_id = feed_media_public_id(feed_id, &path);

            match self.staging.read(&path).await {
                Ok(data) => {
                    requests.push(UploadRequest {
                        public_id,
                        filename: file_name(&path),
                        content_type: content_type_of(item),
                        data,
                    });
                    pending.push(item);
                }
                Err(StagingError::NotFound(_)) => {
                    if self.feeds.media_exists(feed_id, &public_id).await? {
                        tracing::debug!(public_id = %public_id, "Staged file already ingested");
                        report.skipped += 1;
                    } else {
                        tracing::warn!(path = %item.file_path, "Staged file missing, recording failure");
                        failures.push(failure(item, MISSING_STAGED_FILE.to_string(), attempts_made));
                    }
                }
                Err(e @ StagingError::OutsideStagingDir(_)) => {
                    tracing::warn!(path = %item.file_path, "Rejected staged path");
                    failures.push(failure(item, e.to_string(), attempts_made));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let batch = self.uploader.upload_all(requests).await;

        let mut media = Vec::with_capacity(batch.success_count());
        let mut retry: Vec<ContentData> = Vec::new();
        let mut finished: Vec<PathBuf> = Vec::new();

        for result in &batch.results {
            let item = pending[result.index];
            match &result.outcome {
                Ok(uploaded) => {
                    media.push(NewFeedMedia {
                        url: uploaded.url.clone(),
                        public_id: uploaded.public_id.clone(),
                        media_type: uploaded.media_type.clone(),
                    });
                    finished.push(PathBuf::from(&item.file_path));
                }
                Err(_) if attempts_made < self.max_attempts => retry.push(item.clone()),
                Err(e) => {
                    failures.push(failure(item, e.to_string(), attempts_made));
                    finished.push(PathBuf::from(&item.file_path));
                }
            }
        }

        match self.feeds.persist_ingestion(feed_id, &media, &failures).await {
            Ok(outcome) => {
                tracing::debug!(
                    inserted = outcome.inserted,
                    duplicates = outcome.duplicates,
                    failures_recorded = outcome.failures_recorded,
                    "Ingestion persisted"
                );
            }
            Err(AppError::NotFound(_)) => {
                tracing::warn!("Feed deleted during ingestion, removing uploaded objects");
                let public_ids: Vec<&str> = media.iter().map(|m| m.public_id.as_str()).collect();
                self.delete_objects(public_ids.into_iter()).await;
                self.discard_staged(&payload.content).await;
                return Ok(IngestionReport {
                    feed_id,
                    skipped: payload.content.len(),
                    ..Default::default()
                });
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    uploaded = media.len(),
                    "Failed to persist ingested media, delivery will be retried"
                );
                return Err(e);
            }
        }

        report.uploaded = media.len();
        report.failed = failures.len();
        report.retried = retry.len();

        if !retry.is_empty() {
            let delay = retry_backoff(attempts_made, self.retry_backoff_cap_secs);
            let event = IngestionEvent::UploadFeedMedias(UploadPayload {
                feed_id,
                content: retry,
                attempt: attempts_made,
            });
            self.publisher
                .publish_event_delayed(&event, delay)
                .await
                .map_err(|e| AppError::Publish {
                    feed_id,
                    message: e.to_string(),
                })?;
            tracing::info!(
                retried = report.retried,
                delay_secs = delay.as_secs(),
                "Failed uploads queued for retry"
            );
        }

        let finished_paths: Vec<&Path> = finished.iter().map(PathBuf::as_path).collect();
        self.staging.remove_all(finished_paths).await;

        Ok(report)
    }

    #[tracing::instrument(skip(self, payload), fields(public_id = %payload.public_id))]
    async fn delete_media(&self, payload: DeletePayload) -> Result<(), AppError> {
        match self.uploader.storage().delete(&payload.public_id).await? {
            DeleteOutcome::Deleted => tracing::info!("Media object deleted"),
            DeleteOutcome::AlreadyAbsent => tracing::debug!("Media object already absent"),
        }
        Ok(())
    }

    async fn delete_objects<'a>(&self, public_ids: impl Iterator<Item = &'a str>) {
        for public_id in public_ids {
            if let Err(e) = self.uploader.storage().delete(public_id).await {
                tracing::warn!(public_id = %public_id, error = %e, "Failed to delete orphaned object");
            }
        }
    }

    async fn discard_staged(&self, content: &[ContentData]) {
        let paths: Vec<&Path> = content
            .iter()
            .map(|c| Path::new(c.file_path.as_str()))
            .collect();
        self.staging.remove_all(paths).await;
    }

    async fn emit(&self, report: IngestionReport) {
        tracing::info!(
            feed_id = %report.feed_id,
            uploaded = report.uploaded,
            retried = report.retried,
            failed = report.failed,
            skipped = report.skipped,
            "Feed media ingestion finished"
        );
        if let Some(tx) = &self.reports {
            if tx.send(report).await.is_err() {
                tracing::debug!("Report receiver dropped");
            }
        }
    }
}

fn failure(item: &ContentData, error: String, attempts: u32) -> MediaFailure {
    MediaFailure {
        file_path: item.file_path.clone(),
        file_type: item.file_type.clone(),
        error,
        attempts,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Declared MIME type, or a wildcard of the declared kind for payloads that lack one.
fn content_type_of(item: &ContentData) -> String {
    if let Some(content_type) = &item.content_type {
        return content_type.clone();
    }
    match item.file_type.as_str() {
        "Image" => "image/*",
        "Video" => "video/*",
        "Audio" => "audio/*",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_backoff_doubles_and_caps() {
        assert_eq!(retry_backoff(1, 300), Duration::from_secs(2));
        assert_eq!(retry_backoff(2, 300), Duration::from_secs(4));
        assert_eq!(retry_backoff(20, 300), Duration::from_secs(300));
        assert_eq!(retry_backoff(u32::MAX, 60), Duration::from_secs(60));
    }

    #[test]
    fn content_type_falls_back_to_declared_kind() {
        let mut item = ContentData {
            file_path: "/tmp/a.png".to_string(),
            file_type: "Image".to_string(),
            content_type: None,
        };
        assert_eq!(content_type_of(&item), "image/*");

        item.content_type = Some("image/png".to_string());
        assert_eq!(content_type_of(&item), "image/png");

        item.content_type = None;
        item.file_type = "File".to_string();
        assert_eq!(content_type_of(&item), "application/octet-stream");
    }
}
