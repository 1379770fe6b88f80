use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::app::events::{EventSink, Outbox};
use crate::domain::error::{SocialError, SocialResult};
use crate::domain::event::{DomainEvent, NewFollower};
use crate::domain::social_graph::{Follow, FollowToggle, Relationship};
use crate::domain::user::User;
use crate::infra::store::Store;

const MAX_TOGGLE_ATTEMPTS: usize = 8;

#[derive(Clone)]
pub struct FollowService {
    store: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
}

impl FollowService {
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventSink>) -> Self {
        Self { store, events }
    }

    /// Non-toggling follow: an existing edge is a conflict.
    pub async fn follow(&self, follower_id: Uuid, following_id: Uuid) -> SocialResult<Follow> {
        self.check_pair(follower_id, following_id).await?;

        let mut outbox = Outbox::new(self.events.as_ref());
        let follow = self
            .store
            .insert_follow(follower_id, following_id)
            .await?
            .ok_or_else(|| SocialError::conflict("already following this user"))?;
        outbox.stage(new_follower(follower_id, following_id));
        outbox.commit();

        Ok(follow)
    }

    /// Idempotent: reports whether an edge was actually removed.
    pub async fn unfollow(&self, follower_id: Uuid, following_id: Uuid) -> SocialResult<bool> {
        self.check_pair(follower_id, following_id).await?;
        Ok(self.store.delete_follow(follower_id, following_id).await?)
    }

    pub async fn toggle_follow(
        &self,
        follower_id: Uuid,
        following_id: Uuid,
    ) -> SocialResult<FollowToggle> {
        self.check_pair(follower_id, following_id).await?;

        let mut outbox = Outbox::new(self.events.as_ref());
        let followed = self.flip(follower_id, following_id).await?;
        if followed {
            outbox.stage(new_follower(follower_id, following_id));
        }
        outbox.commit();

        let is_friend = followed && self.store.follow_exists(following_id, follower_id).await?;
        Ok(FollowToggle { followed, is_friend })
    }

    pub async fn followers(&self, user_id: Uuid) -> SocialResult<Vec<User>> {
        self.require_user(user_id).await?;
        Ok(self.store.list_followers(user_id).await?)
    }

    pub async fn following(&self, user_id: Uuid) -> SocialResult<Vec<User>> {
        self.require_user(user_id).await?;
        Ok(self.store.list_following(user_id).await?)
    }

    pub async fn relationship(&self, viewer_id: Uuid, other_id: Uuid) -> SocialResult<Relationship> {
        self.require_user(other_id).await?;
        if viewer_id == other_id {
            return Ok(Relationship::new(false, false));
        }
        let is_following = self.store.follow_exists(viewer_id, other_id).await?;
        let is_followed_by = self.store.follow_exists(other_id, viewer_id).await?;
        Ok(Relationship::new(is_following, is_followed_by))
    }

    async fn flip(&self, follower_id: Uuid, following_id: Uuid) -> SocialResult<bool> {
        for attempt in 1..=MAX_TOGGLE_ATTEMPTS {
            if self.store.delete_follow(follower_id, following_id).await? {
                return Ok(false);
            }
            if self
                .store
                .insert_follow(follower_id, following_id)
                .await?
                .is_some()
            {
                return Ok(true);
            }
            debug!(follower_id = %follower_id, following_id = %following_id, attempt, "follow toggle lost a race");
        }
        Err(SocialError::conflict("follow is being toggled concurrently, try again"))
    }

    async fn check_pair(&self, follower_id: Uuid, following_id: Uuid) -> SocialResult<()> {
        if follower_id == following_id {
            return Err(SocialError::invalid("you cannot follow yourself"));
        }
        self.require_user(follower_id).await?;
        self.require_user(following_id).await?;
        Ok(())
    }

    async fn require_user(&self, id: Uuid) -> SocialResult<User> {
        self.store
            .find_user(id)
            .await?
            .ok_or(SocialError::NotFound("user"))
    }
}

fn new_follower(follower_id: Uuid, following_id: Uuid) -> DomainEvent {
    DomainEvent::NewFollower(NewFollower {
        follower_id,
        following_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::events::CapturingSink;
    use crate::domain::user::{NewUser, Role};
    use crate::infra::store::MemoryStore;

    async fn setup() -> (FollowService, Arc<MemoryStore>, Arc<CapturingSink>, User, User) {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(CapturingSink::new());
        let mut users = Vec::new();
        for name in ["alice", "bob"] {
            users.push(
                store
                    .insert_user(NewUser {
                        username: name.into(),
                        role: Role::User,
                    })
                    .await
                    .unwrap(),
            );
        }
        let bob = users.pop().unwrap();
        let alice = users.pop().unwrap();
        let service = FollowService::new(store.clone(), sink.clone());
        (service, store, sink, alice, bob)
    }

    #[tokio::test]
    async fn toggle_follow_round_trips_and_tracks_friendship() {
        let (service, _store, sink, alice, bob) = setup().await;

        let first = service.toggle_follow(alice.id, bob.id).await.unwrap();
        assert_eq!(first, FollowToggle { followed: true, is_friend: false });

        let back = service.toggle_follow(bob.id, alice.id).await.unwrap();
        assert_eq!(back, FollowToggle { followed: true, is_friend: true });

        let undo = service.toggle_follow(alice.id, bob.id).await.unwrap();
        assert_eq!(undo, FollowToggle { followed: false, is_friend: false });

        // one event per new edge, none for the unfollow
        assert_eq!(sink.events().len(), 2);
        let relationship = service.relationship(bob.id, alice.id).await.unwrap();
        assert!(relationship.is_following);
        assert!(!relationship.is_followed_by);
        assert!(!relationship.is_friend);
    }

    #[tokio::test]
    async fn self_follow_is_rejected_without_writing() {
        let (service, store, sink, alice, _bob) = setup().await;

        for result in [
            service.toggle_follow(alice.id, alice.id).await.map(|_| ()),
            service.follow(alice.id, alice.id).await.map(|_| ()),
        ] {
            assert!(matches!(result, Err(SocialError::InvalidRequest(_))));
        }
        assert!(!store.follow_exists(alice.id, alice.id).await.unwrap());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn follow_twice_conflicts() {
        let (service, _store, sink, alice, bob) = setup().await;

        service.follow(alice.id, bob.id).await.unwrap();
        let again = service.follow(alice.id, bob.id).await;
        assert!(matches!(again, Err(SocialError::Conflict(_))));
        assert_eq!(sink.events().len(), 1);

        assert!(service.unfollow(alice.id, bob.id).await.unwrap());
        assert!(!service.unfollow(alice.id, bob.id).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_users_are_not_found() {
        let (service, _store, _sink, alice, _bob) = setup().await;
        let result = service.toggle_follow(alice.id, Uuid::new_v4()).await;
        assert!(matches!(result, Err(SocialError::NotFound("user"))));
    }

    #[tokio::test]
    async fn follower_lists_reflect_edges() {
        let (service, _store, _sink, alice, bob) = setup().await;
        service.follow(alice.id, bob.id).await.unwrap();

        let followers = service.followers(bob.id).await.unwrap();
        assert_eq!(followers.iter().map(|u| u.id).collect::<Vec<_>>(), vec![alice.id]);
        let following = service.following(alice.id).await.unwrap();
        assert_eq!(following.iter().map(|u| u.id).collect::<Vec<_>>(), vec![bob.id]);
        assert!(service.followers(alice.id).await.unwrap().is_empty());
    }
}
