use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub user_id: Uuid,
    /// Set for replies.
    pub parent_id: Option<Uuid>,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub feed_id: Uuid,
    pub user_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub comment: String,
}
