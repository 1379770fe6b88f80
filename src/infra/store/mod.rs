//! Persistence contract for the social core.
//!
//! Every method is atomic on its own. Uniqueness of likes and follows is
//! enforced here, not by callers: `insert_like` and `insert_follow` return
//! `None` when the row already exists, which callers treat as a lost race.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::engagement::{Comment, Like, LikeTarget, NewComment};
use crate::domain::error::SocialError;
use crate::domain::notification::{NewNotification, Notification};
use crate::domain::post::{NewPost, Post, Tombstone};
use crate::domain::social_graph::Follow;
use crate::domain::user::{NewUser, User};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Reported by every backend when a follow edge would point at its own source.
pub const SELF_FOLLOW_MESSAGE: &str = "users cannot follow themselves";

/// Keyset pagination position: `(created_at, id)` of the last item seen.
pub type Cursor = (OffsetDateTime, Uuid);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.into())
    }
}

impl From<StoreError> for SocialError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => SocialError::NotFound(what),
            StoreError::Conflict(message) => SocialError::Conflict(message),
            StoreError::Backend(err) => SocialError::Internal(err),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    // Users
    async fn insert_user(&self, new: NewUser) -> StoreResult<User>;
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    /// Removes the user together with their posts, comments, likes and follows.
    async fn delete_user(&self, id: Uuid) -> StoreResult<bool>;

    // Posts
    async fn insert_post(&self, new: NewPost) -> StoreResult<Post>;
    async fn find_live_post(&self, id: Uuid) -> StoreResult<Option<Post>>;
    async fn find_post_including_tombstoned(&self, id: Uuid) -> StoreResult<Option<Post>>;
    async fn list_live_posts(&self, cursor: Option<Cursor>, limit: i64) -> StoreResult<Vec<Post>>;
    /// Sets or clears the tombstone. Returns the updated post, if it exists.
    async fn set_post_tombstone(
        &self,
        id: Uuid,
        tombstone: Option<Tombstone>,
    ) -> StoreResult<Option<Post>>;
    /// Permanently removes the post, its comments and every like on either.
    async fn delete_post(&self, id: Uuid) -> StoreResult<bool>;

    // Comments
    /// Fails with `NotFound` if the post is no longer live or the parent is gone.
    async fn insert_comment(&self, new: NewComment) -> StoreResult<Comment>;
    async fn find_comment(&self, id: Uuid) -> StoreResult<Option<Comment>>;
    /// Oldest first.
    async fn list_comments_for_post(&self, post_id: Uuid) -> StoreResult<Vec<Comment>>;
    async fn update_comment_content(&self, id: Uuid, content: String)
        -> StoreResult<Option<Comment>>;
    /// Removes the comment, all of its replies, and likes on any of them.
    async fn delete_comment(&self, id: Uuid) -> StoreResult<bool>;

    // Likes
    async fn insert_like(&self, user_id: Uuid, target: LikeTarget) -> StoreResult<Option<Like>>;
    async fn delete_like(&self, user_id: Uuid, target: LikeTarget) -> StoreResult<bool>;
    async fn like_exists(&self, user_id: Uuid, target: LikeTarget) -> StoreResult<bool>;
    async fn count_likes(&self, target: LikeTarget) -> StoreResult<i64>;

    // Follows
    async fn insert_follow(&self, follower_id: Uuid, following_id: Uuid)
        -> StoreResult<Option<Follow>>;
    async fn delete_follow(&self, follower_id: Uuid, following_id: Uuid) -> StoreResult<bool>;
    async fn follow_exists(&self, follower_id: Uuid, following_id: Uuid) -> StoreResult<bool>;
    /// Newest first.
    async fn list_followers(&self, user_id: Uuid) -> StoreResult<Vec<User>>;
    /// Newest first.
    async fn list_following(&self, user_id: Uuid) -> StoreResult<Vec<User>>;

    // Notifications
    async fn insert_notification(&self, new: NewNotification) -> StoreResult<Notification>;
    /// Newest first.
    async fn list_notifications(
        &self,
        receiver_id: Uuid,
        cursor: Option<Cursor>,
        limit: i64,
    ) -> StoreResult<Vec<Notification>>;
    async fn mark_notification_read(&self, id: Uuid, receiver_id: Uuid) -> StoreResult<bool>;
    /// Deletes read notifications created before `older_than`.
    async fn purge_read_notifications(&self, older_than: OffsetDateTime) -> StoreResult<u64>;
}
