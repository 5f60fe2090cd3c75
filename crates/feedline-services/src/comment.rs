use std::sync::Arc;

use feedline_core::models::{Comment, NewComment};
use feedline_core::AppError;
use feedline_db::{CommentStore, FeedStore};
use uuid::Uuid;

/// Comments and single-level replies on feeds.
#[derive(Clone)]
pub struct CommentService {
    feeds: Arc<dyn FeedStore>,
    comments: Arc<dyn CommentStore>,
}

impl CommentService {
    pub fn new(feeds: Arc<dyn FeedStore>, comments: Arc<dyn CommentStore>) -> Self {
        Self { feeds, comments }
    }

    #[tracing::instrument(skip(self, text), fields(feed_id = %feed_id, user_id = %user_id))]
    pub async fn create_comment(
        &self,
        feed_id: Uuid,
        user_id: Uuid,
        text: &str,
    ) -> Result<Comment, AppError> {
        let text = validate_text(text)?;
        if !self.feeds.feed_exists(feed_id).await? {
            return Err(AppError::NotFound(format!("Feed {} not found", feed_id)));
        }

        self.comments
            .create_comment(NewComment {
                feed_id,
                user_id,
                parent_id: None,
                comment: text,
            })
            .await
    }

    /// Reply to `parent_id`, which must be a comment on the same feed.
    #[tracing::instrument(skip(self, text), fields(feed_id = %feed_id, parent_id = %parent_id))]
    pub async fn create_reply(
        &self,
        feed_id: Uuid,
        parent_id: Uuid,
        user_id: Uuid,
        text: &str,
    ) -> Result<Comment, AppError> {
        let text = validate_text(text)?;
        match self.comments.get_comment(parent_id).await? {
            Some(parent) if parent.feed_id == feed_id => {}
            _ => return Err(AppError::NotFound(format!("Comment {} not found", parent_id))),
        }

        self.comments
            .create_comment(NewComment {
                feed_id,
                user_id,
                parent_id: Some(parent_id),
                comment: text,
            })
            .await
    }

    pub async fn list_comments(&self, feed_id: Uuid) -> Result<Vec<Comment>, AppError> {
        self.comments.list_comments(feed_id).await
    }
}

fn validate_text(text: &str) -> Result<String, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::InvalidInput("Comment must not be empty".to_string()));
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedline_db::MemoryStore;

    async fn setup() -> (CommentService, Uuid, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        let feed = store.create_feed(user, "post").await.unwrap();
        (CommentService::new(store.clone(), store), feed.id, user)
    }

    #[tokio::test]
    async fn comment_on_missing_feed_is_not_found() {
        let (service, _feed, user) = setup().await;
        let err = service
            .create_comment(Uuid::new_v4(), user, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn reply_links_to_parent() {
        let (service, feed, user) = setup().await;
        let parent = service.create_comment(feed, user, "first").await.unwrap();

        let reply = service
            .create_reply(feed, parent.id, user, "  second  ")
            .await
            .unwrap();

        assert_eq!(reply.parent_id, Some(parent.id));
        assert_eq!(reply.comment, "second");
        assert_eq!(service.list_comments(feed).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reply_to_missing_or_foreign_parent_is_not_found() {
        let (service, feed, user) = setup().await;

        let err = service
            .create_reply(feed, Uuid::new_v4(), user, "orphan")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let parent = service.create_comment(feed, user, "first").await.unwrap();
        let err = service
            .create_reply(Uuid::new_v4(), parent.id, user, "wrong feed")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn empty_comment_is_invalid() {
        let (service, feed, user) = setup().await;
        let err = service.create_comment(feed, user, "   ").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
