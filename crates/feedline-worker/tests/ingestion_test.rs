//! End-to-end ingestion: orchestrator -> broker -> worker, against in-memory store and broker
//! and local object storage in a temp directory.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feedline_broker::{EventPublisher, MemoryBroker, MessageBroker};
use feedline_core::models::{Feed, IncomingFile};
use feedline_core::{DeletePayload, IngestionConfig, IngestionEvent, StorageBackend};
use feedline_db::{FeedStore, MemoryStore};
use feedline_services::FeedIngestionOrchestrator;
use feedline_storage::{
    BoundedUploader, DeleteOutcome, LocalStorage, StagingArea, Storage, StorageError,
    StorageResult, StoredObject,
};
use feedline_worker::{
    process_delivery, ConsumerConfig, DeliveryOutcome, IngestionConsumer, IngestionReport,
    MediaIngestionWorker,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

const QUEUE: &str = "events";
const HANDLER_TIMEOUT: Duration = Duration::from_secs(10);

/// Local storage that rejects GIF uploads while `reject_gif` is set.
struct FlakyStorage {
    inner: LocalStorage,
    reject_gif: AtomicBool,
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn upload(
        &self,
        public_id: &str,
        filename: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> StorageResult<StoredObject> {
        if content_type == "image/gif" && self.reject_gif.load(Ordering::SeqCst) {
            return Err(StorageError::UploadFailed("gif rejected".to_string()));
        }
        self.inner
            .upload(public_id, filename, content_type, data)
            .await
    }

    async fn delete(&self, public_id: &str) -> StorageResult<DeleteOutcome> {
        self.inner.delete(public_id).await
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

struct Harness {
    dir: TempDir,
    store: Arc<MemoryStore>,
    broker: Arc<MemoryBroker>,
    storage: Arc<FlakyStorage>,
    staging: StagingArea,
    orchestrator: FeedIngestionOrchestrator,
    worker: Arc<MediaIngestionWorker>,
    reports: mpsc::Receiver<IngestionReport>,
}

impl Harness {
    async fn new(max_attempts: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("staging")).await.unwrap();
        let storage = Arc::new(FlakyStorage {
            inner: LocalStorage::new(dir.path().join("objects"), "http://media.test".to_string())
                .await
                .unwrap(),
            reject_gif: AtomicBool::new(true),
        });
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let publisher = EventPublisher::new(broker.clone(), "", QUEUE);

        let orchestrator =
            FeedIngestionOrchestrator::new(store.clone(), staging.clone(), publisher.clone());

        let (tx, reports) = mpsc::channel(16);
        let config = IngestionConfig {
            max_attempts,
            ..Default::default()
        };
        let worker = MediaIngestionWorker::new(
            store.clone(),
            staging.clone(),
            BoundedUploader::with_default_limit(storage.clone()),
            publisher,
            &config,
        )
        .with_reports(tx);

        Self {
            dir,
            store,
            broker,
            storage,
            staging,
            orchestrator,
            worker: Arc::new(worker),
            reports,
        }
    }

    async fn create_feed(&self, files: &[IncomingFile]) -> Feed {
        self.orchestrator
            .create_feed(Uuid::new_v4(), "hello", files)
            .await
            .unwrap()
    }

    async fn consume_one(&self) -> DeliveryOutcome {
        let delivery = self
            .broker
            .receive(QUEUE)
            .await
            .unwrap()
            .expect("a visible delivery");
        process_delivery(self.broker.as_ref(), &self.worker, delivery, HANDLER_TIMEOUT).await
    }

    fn staged_files(&self) -> usize {
        std::fs::read_dir(self.staging.dir()).unwrap().count()
    }

    fn stored_objects(&self) -> usize {
        count_files(&self.dir.path().join("objects"))
    }
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

fn png(name: &str) -> IncomingFile {
    IncomingFile::new(format!("{}.png", name), "image/png", name.as_bytes().to_vec())
}

fn gif(name: &str) -> IncomingFile {
    IncomingFile::new(format!("{}.gif", name), "image/gif", name.as_bytes().to_vec())
}

#[tokio::test]
async fn created_feed_has_no_media_until_the_worker_runs() {
    let mut h = Harness::new(3).await;

    let feed = h.create_feed(&[png("a"), png("b")]).await;
    assert!(feed.medias.is_empty());

    let published = h.broker.published();
    assert_eq!(published.len(), 1);
    match IngestionEvent::decode(&published[0].event_type, &published[0].body).unwrap() {
        IngestionEvent::UploadFeedMedias(payload) => {
            assert_eq!(payload.content.len(), 2);
            assert!(payload.content.iter().all(|c| c.file_type == "Image"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(h.consume_one().await, DeliveryOutcome::Acked);

    let stored = h.store.get_feed(feed.id).await.unwrap().unwrap();
    assert_eq!(stored.medias.len(), 2);
    for media in &stored.medias {
        assert!(media.url.starts_with("http://media.test/upload/v"));
        assert!(media.url.ends_with(".png"));
        assert_eq!(media.media_type, "image");
    }
    assert_eq!(h.staged_files(), 0);
    assert_eq!(h.stored_objects(), 2);
    assert_eq!(h.broker.in_flight_count(), 0);
    assert_eq!(h.broker.ready_count(QUEUE), 0);

    let report = h.reports.recv().await.unwrap();
    assert_eq!(report.feed_id, feed.id);
    assert_eq!(report.uploaded, 2);
    assert_eq!(report.retried + report.failed + report.skipped, 0);
}

#[tokio::test]
async fn failed_uploads_are_retried_with_a_reduced_event() {
    let mut h = Harness::new(3).await;
    let feed = h.create_feed(&[png("a"), gif("b"), png("c")]).await;

    assert_eq!(h.consume_one().await, DeliveryOutcome::Acked);

    assert_eq!(h.store.media_for(feed.id).len(), 2);
    assert_eq!(h.staged_files(), 1, "the failed file stays staged");
    let report = h.reports.recv().await.unwrap();
    assert_eq!((report.uploaded, report.retried, report.failed), (2, 1, 0));

    let retry = h.broker.published().pop().unwrap();
    assert_eq!(retry.delay, Duration::from_secs(2));
    match IngestionEvent::decode(&retry.event_type, &retry.body).unwrap() {
        IngestionEvent::UploadFeedMedias(payload) => {
            assert_eq!(payload.feed_id, feed.id);
            assert_eq!(payload.attempt, 1);
            assert_eq!(payload.content.len(), 1);
            assert!(payload.content[0].file_path.ends_with(".gif"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    h.storage.reject_gif.store(false, Ordering::SeqCst);
    h.broker.release_delayed();
    assert_eq!(h.consume_one().await, DeliveryOutcome::Acked);

    assert_eq!(h.store.media_for(feed.id).len(), 3);
    assert_eq!(h.staged_files(), 0);
    assert!(h.store.list_failures(feed.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn exhausted_retries_record_a_terminal_failure() {
    let mut h = Harness::new(2).await;
    let feed = h.create_feed(&[png("a"), gif("b")]).await;

    assert_eq!(h.consume_one().await, DeliveryOutcome::Acked);
    h.broker.release_delayed();
    assert_eq!(h.consume_one().await, DeliveryOutcome::Acked);

    let first = h.reports.recv().await.unwrap();
    let second = h.reports.recv().await.unwrap();
    assert_eq!(first.retried, 1);
    assert_eq!((second.uploaded, second.retried, second.failed), (0, 0, 1));

    let failures = h.store.list_failures(feed.id).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].attempts, 2);
    assert_eq!(failures[0].file_type, "Image");

    assert_eq!(h.store.media_for(feed.id).len(), 1);
    assert_eq!(h.staged_files(), 0);
    assert_eq!(h.broker.ready_count(QUEUE), 0);
}

#[tokio::test]
async fn persistence_failure_is_not_acked_and_keeps_staged_files() {
    let h = Harness::new(3).await;
    let feed = h.create_feed(&[png("a"), png("b")]).await;

    h.store.set_fail_writes(true);
    assert_eq!(h.consume_one().await, DeliveryOutcome::Requeued);
    assert_eq!(h.staged_files(), 2);
    assert!(h.store.media_for(feed.id).is_empty());
    assert_eq!(h.broker.ready_count(QUEUE), 1);

    h.store.set_fail_writes(false);
    h.broker.release_delayed();
    let delivery = h.broker.receive(QUEUE).await.unwrap().unwrap();
    assert!(delivery.is_redelivery());
    assert_eq!(
        process_delivery(h.broker.as_ref(), &h.worker, delivery, HANDLER_TIMEOUT).await,
        DeliveryOutcome::Acked
    );

    assert_eq!(h.store.media_for(feed.id).len(), 2);
    assert_eq!(h.staged_files(), 0);
    assert_eq!(h.stored_objects(), 2);
}

#[tokio::test]
async fn redelivery_after_a_crash_before_ack_does_not_duplicate() {
    let mut h = Harness::new(3).await;
    let feed = h.create_feed(&[png("a"), png("b")]).await;

    // Handle without settling, then let the lease lapse.
    let delivery = h.broker.receive(QUEUE).await.unwrap().unwrap();
    let event = IngestionEvent::decode(&delivery.event_type, &delivery.body).unwrap();
    h.worker.handle(event).await.unwrap();
    h.broker.expire_leases();

    assert_eq!(h.consume_one().await, DeliveryOutcome::Acked);

    assert_eq!(h.store.media_for(feed.id).len(), 2);
    assert_eq!(h.stored_objects(), 2);

    let _first = h.reports.recv().await.unwrap();
    let second = h.reports.recv().await.unwrap();
    assert_eq!((second.uploaded, second.skipped), (0, 2));
}

#[tokio::test]
async fn media_of_a_feed_deleted_before_ingestion_is_discarded() {
    let mut h = Harness::new(3).await;
    let owner = Uuid::new_v4();
    let feed = h
        .orchestrator
        .create_feed(owner, "gone", &[png("a")])
        .await
        .unwrap();
    h.store.delete_feed(feed.id, owner).await.unwrap();

    assert_eq!(h.consume_one().await, DeliveryOutcome::Acked);

    assert_eq!(h.staged_files(), 0);
    assert_eq!(h.stored_objects(), 0);
    assert_eq!(h.reports.recv().await.unwrap().skipped, 1);
}

#[tokio::test]
async fn deleting_media_by_public_id_is_idempotent() {
    let h = Harness::new(3).await;
    let owner = Uuid::new_v4();
    let feed = h
        .orchestrator
        .create_feed(owner, "bye", &[png("a"), png("b")])
        .await
        .unwrap();
    assert_eq!(h.consume_one().await, DeliveryOutcome::Acked);
    assert_eq!(h.stored_objects(), 2);

    assert_eq!(h.orchestrator.delete_feed(feed.id, owner).await.unwrap(), 2);
    assert_eq!(h.consume_one().await, DeliveryOutcome::Acked);
    assert_eq!(h.consume_one().await, DeliveryOutcome::Acked);
    assert_eq!(h.stored_objects(), 0);

    let repeat = IngestionEvent::DeleteFeedMedias(DeletePayload {
        public_id: format!("feeds/{}/missing", feed.id),
    });
    EventPublisher::new(h.broker.clone(), "", QUEUE)
        .publish_event(&repeat)
        .await
        .unwrap();
    assert_eq!(h.consume_one().await, DeliveryOutcome::Acked);
}

#[tokio::test]
async fn undecodable_delivery_is_dead_lettered() {
    let h = Harness::new(3).await;
    h.broker
        .publish("", QUEUE, "upload_feed_medias", b"not json")
        .await
        .unwrap();

    assert_eq!(h.consume_one().await, DeliveryOutcome::DeadLettered);
    assert_eq!(h.broker.dead_letters().len(), 1);
    assert_eq!(h.broker.ready_count(QUEUE), 0);
}

#[tokio::test]
async fn consumer_loop_ingests_and_shuts_down() {
    let mut h = Harness::new(3).await;
    let consumer = IngestionConsumer::start(
        h.broker.clone(),
        h.worker.clone(),
        ConsumerConfig {
            queue: QUEUE.to_string(),
            max_workers: 2,
            poll_interval: Duration::from_millis(20),
            sweep_interval: Duration::ZERO,
            ..Default::default()
        },
    );

    let feed = h.create_feed(&[png("a"), png("b")]).await;

    let report = tokio::time::timeout(Duration::from_secs(5), h.reports.recv())
        .await
        .expect("ingestion finished in time")
        .unwrap();
    assert_eq!(report.feed_id, feed.id);
    assert_eq!(report.uploaded, 2);

    consumer.shutdown().await;
    assert_eq!(h.store.media_for(feed.id).len(), 2);
    assert_eq!(h.broker.in_flight_count(), 0);
}
