//! Feedline Services Layer
//!
//! Producer-side business services. Nothing here talks to object storage: feed creation
//! stages files locally and hands them to the ingestion worker through the broker.

pub mod comment;
pub mod feed;
pub mod toggle;

pub use comment::CommentService;
pub use feed::FeedIngestionOrchestrator;
pub use toggle::ToggleMutationEngine;
