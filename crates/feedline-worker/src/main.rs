use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use feedline_broker::{EventPublisher, MessageBroker, PgBroker};
use feedline_core::Config;
use feedline_db::{setup_database, FeedRepository};
use feedline_storage::{create_storage, BoundedUploader, StagingArea};
use feedline_worker::telemetry::init_telemetry;
use feedline_worker::{ConsumerConfig, IngestionConsumer, MediaIngestionWorker};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;
    init_telemetry()?;
    config.validate()?;

    tracing::info!(
        environment = %config.environment,
        storage = %config.storage.backend,
        queue = %config.broker.queue,
        "Starting feedline worker"
    );

    let pool = setup_database(&config.database).await?;
    let broker: Arc<dyn MessageBroker> = Arc::new(
        PgBroker::connect(pool.clone(), &config.broker)
            .await
            .context("Failed to connect to the broker")?,
    );
    let storage = create_storage(&config)
        .await
        .context("Failed to initialize object storage")?;
    let staging = StagingArea::new(config.staging.dir.clone())
        .await
        .context("Failed to open the staging directory")?;

    let uploader = BoundedUploader::new(storage, config.ingestion.upload_concurrency)
        .with_timeout(Duration::from_secs(config.ingestion.upload_timeout_secs));
    let publisher = EventPublisher::from_config(broker.clone(), &config.broker);
    let worker = Arc::new(MediaIngestionWorker::new(
        Arc::new(FeedRepository::new(pool.clone())),
        staging,
        uploader,
        publisher,
        &config.ingestion,
    ));

    let consumer =
        IngestionConsumer::start(broker.clone(), worker, ConsumerConfig::from_config(&config));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for the shutdown signal")?;
    tracing::info!("Shutdown signal received");

    consumer.shutdown().await;
    broker.close().await.context("Failed to close the broker")?;
    pool.close().await;

    tracing::info!("Feedline worker stopped");
    Ok(())
}
