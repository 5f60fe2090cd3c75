//! Feedline Database Layer
//!
//! Store traits used by the services and the ingestion worker, their Postgres
//! implementations (sqlx) and in-memory implementations for tests and local runs.

pub mod db;
pub mod memory;
pub mod setup;
pub mod traits;

// Re-exports: repositories
pub use db::{CommentRepository, FeedRepository, RelationRepository, UserRepository};

// Re-exports: transaction utilities
pub use db::transaction::{with_transaction, TransactionGuard};

pub use memory::MemoryStore;
pub use setup::{connect_pool, run_migrations, setup_database};
pub use traits::{CommentStore, FeedStore, PersistOutcome, RelationStore};
