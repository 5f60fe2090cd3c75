//! Broker consumer: worker pool, polling with wake-ups, ack/nack and shutdown.
//!
//! A delivery is acked only after [`MediaIngestionWorker::handle`] returns `Ok`. Handler
//! errors and timeouts nack with requeue so the broker redelivers with backoff; payloads
//! that cannot be decoded are dead-lettered right away.
//!
//! Shutdown: [`IngestionConsumer::shutdown`] stops receiving and waits for in-flight
//! deliveries. Deliveries cut short by process exit are redelivered once their lease
//! expires.

use std::sync::Arc;
use std::time::Duration;

use feedline_broker::{BrokerError, Delivery, MessageBroker};
use feedline_core::{Config, IngestionEvent};
use feedline_storage::StagingArea;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::ingestion::MediaIngestionWorker;

#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub queue: String,
    pub max_workers: usize,
    pub poll_interval: Duration,
    pub handler_timeout: Duration,
    /// Interval between staging sweeps. Zero disables the sweeper.
    pub sweep_interval: Duration,
    pub staging_max_age: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queue: feedline_core::constants::DEFAULT_EVENT_QUEUE.to_string(),
            max_workers: 4,
            poll_interval: Duration::from_millis(1000),
            handler_timeout: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(600),
            staging_max_age: Duration::from_secs(24 * 3600),
        }
    }
}

impl ConsumerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue: config.broker.queue.clone(),
            max_workers: config.worker.max_workers,
            poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
            handler_timeout: Duration::from_secs(config.worker.handler_timeout_secs),
            sweep_interval: Duration::from_secs(config.staging.sweep_interval_secs),
            staging_max_age: Duration::from_secs(config.staging.max_age_secs),
        }
    }
}

/// What happened to a delivery after handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    Requeued,
    DeadLettered,
}

pub struct IngestionConsumer {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl IngestionConsumer {
    /// Spawn the consumer loop and the staging sweeper.
    pub fn start(
        broker: Arc<dyn MessageBroker>,
        worker: Arc<MediaIngestionWorker>,
        config: ConsumerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Self::run(broker, worker, config, shutdown_rx));
        Self { shutdown_tx, task }
    }

    /// Stop receiving and wait for in-flight deliveries to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Ingestion consumer task failed");
        }
    }

    async fn run(
        broker: Arc<dyn MessageBroker>,
        worker: Arc<MediaIngestionWorker>,
        config: ConsumerConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let max_workers = config.max_workers.max(1);
        tracing::info!(
            queue = %config.queue,
            max_workers,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            "Ingestion consumer started"
        );

        let semaphore = Arc::new(Semaphore::new(max_workers));
        let sweeper = spawn_sweeper(
            worker.staging().clone(),
            config.sweep_interval,
            config.staging_max_age,
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown_rx.changed() => break,
            };

            match broker.receive(&config.queue).await {
                Ok(Some(delivery)) => {
                    let broker = broker.clone();
                    let worker = worker.clone();
                    let handler_timeout = config.handler_timeout;
                    tokio::spawn(async move {
                        let _permit = permit;
                        process_delivery(broker.as_ref(), &worker, delivery, handler_timeout).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tracing::trace!("No messages available");
                    tokio::select! {
                        _ = broker.wait_for_message(&config.queue, config.poll_interval) => {}
                        _ = shutdown_rx.changed() => break,
                    }
                }
                Err(BrokerError::Closed) => {
                    tracing::warn!("Broker closed, stopping consumer");
                    break;
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "Failed to receive from broker");
                    tokio::select! {
                        _ = tokio::time::sleep(config.poll_interval) => {}
                        _ = shutdown_rx.changed() => break,
                    }
                }
            }
        }

        tracing::info!("Ingestion consumer draining in-flight deliveries");
        if semaphore.acquire_many(max_workers as u32).await.is_err() {
            tracing::warn!("Worker pool closed before draining");
        }
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        tracing::info!("Ingestion consumer stopped");
    }
}

/// Decode, handle and settle one delivery.
#[tracing::instrument(
    skip(broker, worker, delivery),
    fields(message_id = %delivery.id, event_type = %delivery.event_type, delivery_count = delivery.delivery_count)
)]
pub async fn process_delivery(
    broker: &dyn MessageBroker,
    worker: &MediaIngestionWorker,
    delivery: Delivery,
    handler_timeout: Duration,
) -> DeliveryOutcome {
    let event = match IngestionEvent::decode(&delivery.event_type, &delivery.body) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "Undecodable delivery, dead-lettering");
            settle(broker, &delivery, Some(false)).await;
            return DeliveryOutcome::DeadLettered;
        }
    };

    match tokio::time::timeout(handler_timeout, worker.handle(event)).await {
        Ok(Ok(())) => {
            settle(broker, &delivery, None).await;
            DeliveryOutcome::Acked
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Delivery handling failed, requeueing");
            settle(broker, &delivery, Some(true)).await;
            DeliveryOutcome::Requeued
        }
        Err(_) => {
            tracing::error!(
                timeout_secs = handler_timeout.as_secs(),
                "Delivery handling timed out, requeueing"
            );
            settle(broker, &delivery, Some(true)).await;
            DeliveryOutcome::Requeued
        }
    }
}

/// `None` acks; `Some(requeue)` nacks.
async fn settle(broker: &dyn MessageBroker, delivery: &Delivery, nack: Option<bool>) {
    let result = match nack {
        None => broker.ack(delivery).await,
        Some(requeue) => broker.nack(delivery, requeue).await,
    };
    // An unsettled delivery comes back when its lease expires.
    if let Err(e) = result {
        tracing::error!(error = %e, message_id = %delivery.id, "Failed to settle delivery");
    }
}

fn spawn_sweeper(
    staging: StagingArea,
    interval: Duration,
    max_age: Duration,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match staging.sweep_expired(max_age).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Swept expired staged files"),
                Err(e) => tracing::error!(error = %e, "Staging sweep failed"),
            }
        }
    }))
}
