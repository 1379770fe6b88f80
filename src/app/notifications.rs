use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::domain::engagement::TargetType;
use crate::domain::error::{SocialError, SocialResult};
use crate::domain::notification::Notification;
use crate::infra::store::{Cursor, Store};

/// Used when the actor's name cannot be resolved.
const FALLBACK_NAME: &str = "Someone";

pub fn comment_message(post_title: &str) -> String {
    format!("Your post '{}' got a new comment.", post_title)
}

pub fn like_message(actor_name: Option<&str>, target: TargetType) -> String {
    format!(
        "{} liked your {}.",
        actor_name.unwrap_or(FALLBACK_NAME),
        target.label()
    )
}

pub fn follow_message(follower_name: Option<&str>) -> String {
    format!(
        "{} started following you.",
        follower_name.unwrap_or(FALLBACK_NAME)
    )
}

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn Store>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list(
        &self,
        receiver_id: Uuid,
        cursor: Option<Cursor>,
        limit: i64,
    ) -> SocialResult<Vec<Notification>> {
        Ok(self
            .store
            .list_notifications(receiver_id, cursor, limit)
            .await?)
    }

    /// Only the receiver can mark a notification read; anyone else gets
    /// `NotFound` so ids do not leak.
    pub async fn mark_read(&self, receiver_id: Uuid, id: Uuid) -> SocialResult<()> {
        if self.store.mark_notification_read(id, receiver_id).await? {
            Ok(())
        } else {
            Err(SocialError::NotFound("notification"))
        }
    }

    /// Deletes read notifications older than `retention`.
    pub async fn purge_read(&self, retention: Duration) -> SocialResult<u64> {
        let cutoff = OffsetDateTime::now_utc() - retention;
        Ok(self.store.purge_read_notifications(cutoff).await?)
    }
}
