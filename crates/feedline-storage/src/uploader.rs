//! Concurrent multi-file upload with a fixed ceiling on in-flight storage calls.
//!
//! Every request yields exactly one [`UploadResult`], returned in input order. Outcomes are
//! gathered by the single consumer of a `buffer_unordered` stream, so no upload task touches
//! shared state and a failed file never hides the successes around it.

use std::sync::Arc;
use std::time::Duration;

use feedline_core::constants::DEFAULT_UPLOAD_CONCURRENCY;
use feedline_core::models::media_type_tag;
use feedline_core::AppError;
use futures::stream::{self, StreamExt};

use crate::traits::{Storage, StorageError};

const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Upload(err.to_string())
    }
}

/// One file to push to object storage.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub public_id: String,
    /// Used for the extension of the served URL.
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// A successfully uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub url: String,
    pub public_id: String,
    /// Coarse type tag (`image`, `video`, ...).
    pub media_type: String,
}

#[derive(Debug)]
pub struct UploadResult {
    /// Position of the request in the input.
    pub index: usize,
    pub public_id: String,
    pub outcome: Result<UploadedMedia, StorageError>,
}

impl UploadResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Results of [`BoundedUploader::upload_all`], one per request, in input order.
#[derive(Debug, Default)]
pub struct UploadBatch {
    pub results: Vec<UploadResult>,
}

impl UploadBatch {
    pub fn successes(&self) -> impl Iterator<Item = (usize, &UploadedMedia)> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_ref().ok().map(|media| (r.index, media)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &StorageError)> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_ref().err().map(|err| (r.index, err)))
    }

    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Clone)]
pub struct BoundedUploader {
    storage: Arc<dyn Storage>,
    max_concurrency: usize,
    upload_timeout: Duration,
}

impl BoundedUploader {
    pub fn new(storage: Arc<dyn Storage>, max_concurrency: usize) -> Self {
        Self {
            storage,
            max_concurrency: max_concurrency.max(1),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }

    pub fn with_default_limit(storage: Arc<dyn Storage>) -> Self {
        Self::new(storage, DEFAULT_UPLOAD_CONCURRENCY)
    }

    pub fn with_timeout(mut self, upload_timeout: Duration) -> Self {
        self.upload_timeout = upload_timeout;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Upload every request with at most `max_concurrency` calls in flight.
    #[tracing::instrument(skip(self, requests), fields(files = requests.len(), limit = self.max_concurrency))]
    pub async fn upload_all(&self, requests: Vec<UploadRequest>) -> UploadBatch {
        let storage = &self.storage;
        let upload_timeout = self.upload_timeout;

        let mut results: Vec<UploadResult> = stream::iter(requests.into_iter().enumerate())
            .map(|(index, request)| async move {
                let public_id = request.public_id.clone();
                let outcome = upload_one(storage.as_ref(), request, upload_timeout).await;
                if let Err(e) = &outcome {
                    tracing::warn!(public_id = %public_id, error = %e, "Upload failed");
                }
                UploadResult {
                    index,
                    public_id,
                    outcome,
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        results.sort_by_key(|r| r.index);

        let batch = UploadBatch { results };
        tracing::debug!(
            uploaded = batch.success_count(),
            failed = batch.failure_count(),
            "Upload batch finished"
        );
        batch
    }
}

async fn upload_one(
    storage: &dyn Storage,
    request: UploadRequest,
    upload_timeout: Duration,
) -> Result<UploadedMedia, StorageError> {
    let call = storage.upload(
        &request.public_id,
        &request.filename,
        &request.content_type,
        request.data,
    );

    let stored = tokio::time::timeout(upload_timeout, call)
        .await
        .map_err(|_| StorageError::Timeout(upload_timeout.as_secs()))??;

    Ok(UploadedMedia {
        url: stored.url,
        public_id: stored.public_id,
        media_type: media_type_tag(&request.content_type),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{DeleteOutcome, StorageResult, StoredObject};
    use crate::StorageBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts concurrent calls; fails any public id containing "bad".
    struct CountingStorage {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl CountingStorage {
        fn new(delay: Duration) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl Storage for CountingStorage {
        async fn upload(
            &self,
            public_id: &str,
            _filename: &str,
            _content_type: &str,
            _data: Vec<u8>,
        ) -> StorageResult<StoredObject> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if public_id.contains("bad") {
                return Err(StorageError::UploadFailed(format!("rejected {}", public_id)));
            }
            Ok(StoredObject {
                public_id: public_id.to_string(),
                url: format!("https://cdn.test/upload/v1/{}.png", public_id),
            })
        }

        async fn delete(&self, _public_id: &str) -> StorageResult<DeleteOutcome> {
            Ok(DeleteOutcome::Deleted)
        }

        fn backend_type(&self) -> StorageBackend {
            StorageBackend::Local
        }
    }

    fn request(public_id: &str) -> UploadRequest {
        UploadRequest {
            public_id: public_id.to_string(),
            filename: format!("{}.png", public_id),
            content_type: "image/png".to_string(),
            data: vec![0; 4],
        }
    }

    #[tokio::test]
    async fn never_exceeds_concurrency_limit() {
        let storage = Arc::new(CountingStorage::new(Duration::from_millis(20)));
        let uploader = BoundedUploader::new(storage.clone(), 5);

        let requests = (0..12).map(|i| request(&format!("f{}", i))).collect();
        let batch = uploader.upload_all(requests).await;

        assert_eq!(batch.len(), 12);
        assert_eq!(batch.success_count(), 12);
        let peak = storage.peak.load(Ordering::SeqCst);
        assert!(peak <= 5, "peak in-flight uploads was {}", peak);
        assert!(peak > 1, "uploads did not run concurrently");
    }

    #[tokio::test]
    async fn failure_keeps_other_successes_in_input_order() {
        let storage = Arc::new(CountingStorage::new(Duration::from_millis(1)));
        let uploader = BoundedUploader::new(storage, 5);

        let batch = uploader
            .upload_all(vec![request("a"), request("bad"), request("c")])
            .await;

        let indexes: Vec<usize> = batch.results.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(batch.success_count(), 2);

        let failed: Vec<usize> = batch.failures().map(|(i, _)| i).collect();
        assert_eq!(failed, vec![1]);

        let (_, first) = batch.successes().next().unwrap();
        assert_eq!(first.public_id, "a");
        assert_eq!(first.media_type, "image");
    }

    #[tokio::test]
    async fn slow_upload_times_out_per_file() {
        let storage = Arc::new(CountingStorage::new(Duration::from_millis(200)));
        let uploader =
            BoundedUploader::new(storage, 2).with_timeout(Duration::from_millis(10));

        let batch = uploader.upload_all(vec![request("slow")]).await;

        assert!(matches!(
            batch.results[0].outcome,
            Err(StorageError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn empty_input_yields_empty_batch() {
        let storage = Arc::new(CountingStorage::new(Duration::ZERO));
        let batch = BoundedUploader::with_default_limit(storage)
            .upload_all(Vec::new())
            .await;
        assert!(batch.is_empty());
    }
}
