//! Postgres repositories
//!
//! Each repository owns one aggregate: feeds with their media and failure markers,
//! toggle relations (likes, follows), comments, and users.

pub mod comment;
pub mod feed;
pub mod relation;
pub mod transaction;
pub mod user;

pub use comment::CommentRepository;
pub use feed::FeedRepository;
pub use relation::RelationRepository;
pub use user::UserRepository;
