//! Database transaction utilities
//!
//! Multi-step writes (feed creation, ingestion results, feed deletion) run inside a
//! [`TransactionGuard`] or through [`with_transaction`] so they either fully apply or not at all.

use feedline_core::AppError;
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::time::Instant;

/// A named database transaction.
///
/// Dropping the guard without calling [`commit`](Self::commit) rolls the transaction back
/// (sqlx returns the connection to the pool with a pending `ROLLBACK`).
///
/// # Example
///
/// ```ignore
/// use feedline_db::TransactionGuard;
///
/// async fn example(pool: &sqlx::PgPool) -> Result<(), feedline_core::AppError> {
///     let mut tx = TransactionGuard::begin(pool, "example").await?;
///     sqlx::query("INSERT INTO ...").execute(&mut **tx).await?;
///     tx.commit().await
/// }
/// ```
pub struct TransactionGuard {
    transaction: Transaction<'static, Postgres>,
    operation: &'static str,
    started: Instant,
}

impl TransactionGuard {
    /// Begin a new database transaction
    pub async fn begin(pool: &PgPool, operation: &'static str) -> Result<Self, AppError> {
        let transaction = pool.begin().await.map_err(|e| {
            tracing::error!(error = %e, operation, "Failed to begin database transaction");
            AppError::Persistence(e)
        })?;

        Ok(Self {
            transaction,
            operation,
            started: Instant::now(),
        })
    }

    /// Commit the transaction
    pub async fn commit(self) -> Result<(), AppError> {
        let operation = self.operation;
        let started = self.started;
        self.transaction.commit().await.map_err(|e| {
            tracing::error!(error = %e, operation, "Failed to commit database transaction");
            AppError::Persistence(e)
        })?;

        tracing::debug!(
            operation,
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Transaction committed"
        );
        Ok(())
    }

    /// Roll the transaction back explicitly
    pub async fn rollback(self) -> Result<(), AppError> {
        let operation = self.operation;
        self.transaction.rollback().await.map_err(AppError::Persistence)?;
        tracing::debug!(operation, "Transaction rolled back");
        Ok(())
    }
}

impl Deref for TransactionGuard {
    type Target = Transaction<'static, Postgres>;

    fn deref(&self) -> &Self::Target {
        &self.transaction
    }
}

impl DerefMut for TransactionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.transaction
    }
}

/// Execute a closure within a database transaction
///
/// Commits when the closure returns `Ok`, rolls back otherwise.
///
/// ```ignore
/// with_transaction(pool, |tx| Box::pin(async move {
///     sqlx::query("INSERT INTO ...").execute(&mut **tx).await?;
///     Ok(())
/// })).await
/// ```
pub async fn with_transaction<F, R>(pool: &PgPool, f: F) -> Result<R, AppError>
where
    F: for<'a> FnOnce(
        &'a mut Transaction<'static, Postgres>,
    ) -> Pin<Box<dyn Future<Output = Result<R, AppError>> + Send + 'a>>,
{
    let mut tx = pool.begin().await?;

    match f(&mut tx).await {
        Ok(result) => {
            tx.commit().await?;
            Ok(result)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}
