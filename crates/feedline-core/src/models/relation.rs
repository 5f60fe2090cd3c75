use serde::{Deserialize, Serialize};
use std::fmt;

/// Many-to-many relations mutated by toggling.
///
/// Each kind is an edge keyed by `(actor, target)` with a uniqueness constraint on the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// `feed_likes(feed_id, user_id)`: actor is the user, target the feed.
    FeedLike,
    /// `user_follows(follower_id, following_id)`: actor follows target.
    UserFollow,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::FeedLike => "feed_like",
            RelationKind::UserFollow => "user_follow",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a toggle mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleOutcome {
    Created,
    Removed,
}

impl ToggleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToggleOutcome::Created => "created",
            ToggleOutcome::Removed => "removed",
        }
    }
}

impl fmt::Display for ToggleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a conflict-tolerant edge insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The uniqueness constraint already held the edge; nothing was written.
    ConflictNoop,
}
