//! Durable queue on top of the `broker_messages` table.
//!
//! Receive claims the oldest visible row with `FOR UPDATE SKIP LOCKED` and pushes its
//! `visible_at` forward by the visibility timeout, which acts as the consumer's lease. If the
//! consumer dies before acking, the row becomes visible again when the lease runs out.

use async_trait::async_trait;
use bytes::Bytes;
use feedline_core::BrokerConfig;
use sqlx::postgres::PgListener;
use sqlx::{FromRow, PgPool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::BrokerError;
use crate::traits::{requeue_delay, Delivery, MessageBroker};

/// Channel name for PostgreSQL LISTEN/NOTIFY; the payload is the queue name.
pub const BROKER_NOTIFY_CHANNEL: &str = "feedline_broker";

/// Upper bound on dead-lettered rows skipped by one receive call.
const MAX_DEAD_LETTERS_PER_RECEIVE: usize = 16;

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    exchange: String,
    queue: String,
    event_type: String,
    body: Vec<u8>,
    delivery_count: i32,
}

impl From<MessageRow> for Delivery {
    fn from(row: MessageRow) -> Self {
        Delivery {
            id: row.id,
            exchange: row.exchange,
            queue: row.queue,
            event_type: row.event_type,
            body: Bytes::from(row.body),
            delivery_count: row.delivery_count,
        }
    }
}

pub struct PgBroker {
    pool: PgPool,
    visibility_timeout: Duration,
    max_deliveries: i32,
    notify: Arc<Notify>,
    listener: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PgBroker {
    /// Open the broker on an existing pool and start the LISTEN task.
    ///
    /// The `broker_messages` table must exist (see the workspace migrations).
    pub async fn connect(pool: PgPool, config: &BrokerConfig) -> Result<Self, BrokerError> {
        sqlx::query("SELECT 1 FROM broker_messages LIMIT 1")
            .execute(&pool)
            .await
            .map_err(|e| BrokerError::Connection(format!("broker_messages unavailable: {}", e)))?;

        let notify = Arc::new(Notify::new());
        let listener = tokio::spawn(Self::listen_loop(pool.clone(), notify.clone()));

        tracing::info!(
            visibility_timeout_secs = config.visibility_timeout_secs,
            max_deliveries = config.max_deliveries,
            "Postgres broker connected"
        );

        Ok(Self {
            pool,
            visibility_timeout: Duration::from_secs(config.visibility_timeout_secs),
            max_deliveries: config.max_deliveries,
            notify,
            listener: Mutex::new(Some(listener)),
            closed: AtomicBool::new(false),
        })
    }

    async fn listen_loop(pool: PgPool, notify: Arc<Notify>) {
        loop {
            match PgListener::connect_with(&pool).await {
                Ok(mut listener) => {
                    if let Err(e) = listener.listen(BROKER_NOTIFY_CHANNEL).await {
                        tracing::warn!(error = %e, "LISTEN failed, will retry");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                    while listener.recv().await.is_ok() {
                        notify.notify_waiters();
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "PgListener connect failed, will retry");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    async fn insert(
        &self,
        exchange: &str,
        routing_key: &str,
        event_type: &str,
        body: &[u8],
        delay: Duration,
    ) -> Result<Uuid, BrokerError> {
        self.ensure_open()?;
        let id = Uuid::new_v4();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BrokerError::Publish(format!("Failed to begin transaction: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO broker_messages (id, exchange, queue, event_type, body, visible_at)
            VALUES ($1, $2, $3, $4, $5, NOW() + make_interval(secs => $6))
            "#,
        )
        .bind(id)
        .bind(exchange)
        .bind(routing_key)
        .bind(event_type)
        .bind(body)
        .bind(delay.as_secs_f64())
        .execute(&mut *tx)
        .await
        .map_err(|e| BrokerError::Publish(format!("Failed to persist message: {}", e)))?;

        // Consumers still discover the message by polling if NOTIFY fails.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(BROKER_NOTIFY_CHANNEL)
            .bind(routing_key)
            .execute(&mut *tx)
            .await
        {
            tracing::warn!(error = %e, message_id = %id, "pg_notify failed, consumers will poll");
        }

        tx.commit()
            .await
            .map_err(|e| BrokerError::Publish(format!("Failed to commit message: {}", e)))?;

        tracing::debug!(
            message_id = %id,
            exchange = %exchange,
            queue = %routing_key,
            event_type = %event_type,
            delay_ms = delay.as_millis() as u64,
            "Message published"
        );

        Ok(id)
    }

    async fn claim_next(&self, queue: &str) -> Result<Option<MessageRow>, BrokerError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            UPDATE broker_messages
            SET delivery_count = delivery_count + 1,
                visible_at = NOW() + make_interval(secs => $2),
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM broker_messages
                WHERE queue = $1 AND status = 'ready' AND visible_at <= NOW()
                ORDER BY visible_at, created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, exchange, queue, event_type, body, delivery_count
            "#,
        )
        .bind(queue)
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn dead_letter(&self, id: Uuid, reason: &str) -> Result<(), BrokerError> {
        sqlx::query(
            r#"
            UPDATE broker_messages
            SET status = 'dead', last_error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of live messages on `queue`, including leased and delayed ones.
    pub async fn pending_count(&self, queue: &str) -> Result<i64, BrokerError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM broker_messages WHERE queue = $1 AND status = 'ready'",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn dead_letter_count(&self, queue: &str) -> Result<i64, BrokerError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM broker_messages WHERE queue = $1 AND status = 'dead'",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl MessageBroker for PgBroker {
    #[tracing::instrument(skip(self, body), fields(broker = "postgres", size_bytes = body.len()))]
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        event_type: &str,
        body: &[u8],
    ) -> Result<Uuid, BrokerError> {
        self.insert(exchange, routing_key, event_type, body, Duration::ZERO)
            .await
    }

    #[tracing::instrument(skip(self, body), fields(broker = "postgres", size_bytes = body.len()))]
    async fn publish_delayed(
        &self,
        exchange: &str,
        routing_key: &str,
        event_type: &str,
        body: &[u8],
        delay: Duration,
    ) -> Result<Uuid, BrokerError> {
        self.insert(exchange, routing_key, event_type, body, delay)
            .await
    }

    async fn receive(&self, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        self.ensure_open()?;

        for _ in 0..MAX_DEAD_LETTERS_PER_RECEIVE {
            let Some(row) = self.claim_next(queue).await? else {
                return Ok(None);
            };

            if row.delivery_count > self.max_deliveries {
                tracing::warn!(
                    message_id = %row.id,
                    queue = %queue,
                    event_type = %row.event_type,
                    delivery_count = row.delivery_count,
                    "Message exceeded max deliveries, dead-lettering"
                );
                self.dead_letter(row.id, "max deliveries exceeded").await?;
                continue;
            }

            return Ok(Some(row.into()));
        }

        Ok(None)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.ensure_open()?;

        let result = sqlx::query("DELETE FROM broker_messages WHERE id = $1")
            .bind(delivery.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            // Another consumer acked it after our lease expired.
            tracing::warn!(message_id = %delivery.id, "Ack for a message that no longer exists");
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError> {
        self.ensure_open()?;

        if !requeue {
            tracing::warn!(
                message_id = %delivery.id,
                event_type = %delivery.event_type,
                "Message rejected, dead-lettering"
            );
            return self.dead_letter(delivery.id, "rejected by consumer").await;
        }

        let delay = requeue_delay(delivery.delivery_count);
        sqlx::query(
            r#"
            UPDATE broker_messages
            SET visible_at = NOW() + make_interval(secs => $2), updated_at = NOW()
            WHERE id = $1 AND status = 'ready'
            "#,
        )
        .bind(delivery.id)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            message_id = %delivery.id,
            delay_secs = delay.as_secs(),
            "Message requeued"
        );
        Ok(())
    }

    async fn wait_for_message(&self, _queue: &str, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
        self.notify.notify_waiters();
        tracing::info!("Postgres broker closed");
        Ok(())
    }
}

impl Drop for PgBroker {
    fn drop(&mut self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }
}
