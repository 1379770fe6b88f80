use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::app::events::{EventSink, Outbox};
use crate::domain::engagement::LikeTarget;
use crate::domain::error::{SocialError, SocialResult};
use crate::domain::event::{DomainEvent, LikeToggled};
use crate::infra::store::Store;

/// Upper bound on delete/insert rounds when concurrent toggles keep racing.
const MAX_TOGGLE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LikeSummary {
    pub count: i64,
    pub liked: bool,
}

#[derive(Clone)]
pub struct LikeService {
    store: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
}

impl LikeService {
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventSink>) -> Self {
        Self { store, events }
    }

    /// Flips the actor's like on `target` and reports the resulting state.
    pub async fn toggle_like(&self, actor_id: Uuid, target: LikeTarget) -> SocialResult<bool> {
        self.store
            .find_user(actor_id)
            .await?
            .ok_or(SocialError::NotFound("user"))?;
        let owner_id = self.resolve_owner(target).await?;

        let mut outbox = Outbox::new(self.events.as_ref());
        let liked = self.flip(actor_id, target).await?;
        outbox.stage(DomainEvent::LikeToggled(LikeToggled {
            actor_id,
            owner_id,
            target,
            now_liked: liked,
        }));
        outbox.commit();

        Ok(liked)
    }

    pub async fn summary(&self, viewer: Uuid, target: LikeTarget) -> SocialResult<LikeSummary> {
        self.resolve_owner(target).await?;
        let count = self.store.count_likes(target).await?;
        let liked = self.store.like_exists(viewer, target).await?;
        Ok(LikeSummary { count, liked })
    }

    /// Each round performs at most one effective mutation. A failed delete
    /// followed by a rejected insert means a concurrent toggle created the
    /// row in between, so the next round removes it instead.
    async fn flip(&self, actor_id: Uuid, target: LikeTarget) -> SocialResult<bool> {
        for attempt in 1..=MAX_TOGGLE_ATTEMPTS {
            if self.store.delete_like(actor_id, target).await? {
                return Ok(false);
            }
            if self.store.insert_like(actor_id, target).await?.is_some() {
                return Ok(true);
            }
            debug!(user_id = %actor_id, target_id = %target.id(), attempt, "like toggle lost a race");
        }
        Err(SocialError::conflict("like is being toggled concurrently, try again"))
    }

    async fn resolve_owner(&self, target: LikeTarget) -> SocialResult<Uuid> {
        match target {
            LikeTarget::Post(id) => self
                .store
                .find_live_post(id)
                .await?
                .map(|post| post.owner_id)
                .ok_or(SocialError::NotFound("post")),
            LikeTarget::Comment(id) => self
                .store
                .find_comment(id)
                .await?
                .map(|comment| comment.author_id)
                .ok_or(SocialError::NotFound("comment")),
        }
    }
}
