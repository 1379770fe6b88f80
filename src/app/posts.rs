use std::sync::Arc;

use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::domain::error::{SocialError, SocialResult};
use crate::domain::post::{slugify, NewPost, Post, Tombstone};
use crate::domain::user::User;
use crate::infra::store::{Cursor, Store, StoreError};

const SLUG_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn Store>,
}

impl PostService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create_post(
        &self,
        owner_id: Uuid,
        title: String,
        content: Option<String>,
    ) -> SocialResult<Post> {
        self.require_user(owner_id).await?;

        let base = slugify(&title);
        let mut slug = base.clone();
        for _ in 0..SLUG_ATTEMPTS {
            let new = NewPost {
                owner_id,
                title: title.clone(),
                content: content.clone(),
                slug: slug.clone(),
            };
            match self.store.insert_post(new).await {
                Ok(post) => return Ok(post),
                Err(StoreError::Conflict(_)) => {
                    let suffix = Uuid::new_v4().simple().to_string();
                    slug = format!("{}-{}", base, &suffix[..8]);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(SocialError::conflict("could not allocate a unique slug"))
    }

    pub async fn get_live(&self, id: Uuid) -> SocialResult<Post> {
        self.store
            .find_live_post(id)
            .await?
            .ok_or(SocialError::NotFound("post"))
    }

    pub async fn list_live(&self, cursor: Option<Cursor>, limit: i64) -> SocialResult<Vec<Post>> {
        Ok(self.store.list_live_posts(cursor, limit).await?)
    }

    /// LIVE -> TOMBSTONED. Only a live post can be soft-deleted.
    pub async fn soft_delete(&self, actor_id: Uuid, id: Uuid) -> SocialResult<Post> {
        let actor = self.require_user(actor_id).await?;
        let post = self.get_live(id).await?;
        ensure_can_manage(&actor, &post)?;

        let tombstone = Tombstone {
            deleted_at: OffsetDateTime::now_utc(),
            deleted_by: actor.id,
        };
        let post = self
            .store
            .set_post_tombstone(id, Some(tombstone))
            .await?
            .ok_or(SocialError::NotFound("post"))?;
        info!(post_id = %id, actor_id = %actor.id, "post soft-deleted");
        Ok(post)
    }

    /// TOMBSTONED -> LIVE. Restoring a live post leaves it unchanged.
    pub async fn restore(&self, actor_id: Uuid, id: Uuid) -> SocialResult<Post> {
        let actor = self.require_user(actor_id).await?;
        let post = self.find_any(id).await?;
        ensure_can_manage(&actor, &post)?;
        if post.is_live() {
            return Ok(post);
        }

        let post = self
            .store
            .set_post_tombstone(id, None)
            .await?
            .ok_or(SocialError::NotFound("post"))?;
        info!(post_id = %id, actor_id = %actor.id, "post restored");
        Ok(post)
    }

    /// Irreversible. Comments and likes go with the post.
    pub async fn hard_delete(&self, actor_id: Uuid, id: Uuid) -> SocialResult<()> {
        let actor = self.require_user(actor_id).await?;
        let post = self.find_any(id).await?;
        ensure_can_manage(&actor, &post)?;

        if !self.store.delete_post(id).await? {
            return Err(SocialError::NotFound("post"));
        }
        info!(post_id = %id, actor_id = %actor.id, "post permanently deleted");
        Ok(())
    }

    async fn find_any(&self, id: Uuid) -> SocialResult<Post> {
        self.store
            .find_post_including_tombstoned(id)
            .await?
            .ok_or(SocialError::NotFound("post"))
    }

    async fn require_user(&self, id: Uuid) -> SocialResult<User> {
        self.store
            .find_user(id)
            .await?
            .ok_or(SocialError::NotFound("user"))
    }
}

fn ensure_can_manage(actor: &User, post: &Post) -> SocialResult<()> {
    if actor.can_manage(post.owner_id) {
        Ok(())
    } else {
        Err(SocialError::denied("only the owner or an admin can do this"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::engagement::{LikeTarget, NewComment};
    use crate::domain::user::{NewUser, Role};
    use crate::infra::store::MemoryStore;

    async fn setup() -> (PostService, Arc<MemoryStore>, User, User, User) {
        let store = Arc::new(MemoryStore::new());
        let mut users = Vec::new();
        for (name, role) in [("owner", Role::User), ("other", Role::User), ("admin", Role::Admin)] {
            users.push(
                store
                    .insert_user(NewUser {
                        username: name.into(),
                        role,
                    })
                    .await
                    .unwrap(),
            );
        }
        let admin = users.pop().unwrap();
        let other = users.pop().unwrap();
        let owner = users.pop().unwrap();
        (PostService::new(store.clone()), store, owner, other, admin)
    }

    #[tokio::test]
    async fn soft_delete_hides_and_restore_revives() {
        let (service, store, owner, _other, _admin) = setup().await;
        let post = service
            .create_post(owner.id, "Hello World".into(), None)
            .await
            .unwrap();
        assert_eq!(post.slug, "hello-world");

        let tombstoned = service.soft_delete(owner.id, post.id).await.unwrap();
        assert_eq!(tombstoned.deleted_by, Some(owner.id));
        assert!(tombstoned.deleted_at.is_some());
        assert!(matches!(
            service.get_live(post.id).await,
            Err(SocialError::NotFound("post"))
        ));
        let found = store
            .find_post_including_tombstoned(post.id)
            .await
            .unwrap()
            .unwrap();
        assert!(found.deleted_at.is_some());
        assert!(service.list_live(None, 10).await.unwrap().is_empty());

        let restored = service.restore(owner.id, post.id).await.unwrap();
        assert!(restored.is_live());
        assert!(restored.deleted_by.is_none());
        assert_eq!(service.get_live(post.id).await.unwrap().id, post.id);
    }

    #[tokio::test]
    async fn strangers_cannot_manage_but_admins_can() {
        let (service, _store, owner, other, admin) = setup().await;
        let post = service.create_post(owner.id, "Mine".into(), None).await.unwrap();

        assert!(matches!(
            service.soft_delete(other.id, post.id).await,
            Err(SocialError::PermissionDenied(_))
        ));
        service.soft_delete(admin.id, post.id).await.unwrap();
        assert!(matches!(
            service.restore(other.id, post.id).await,
            Err(SocialError::PermissionDenied(_))
        ));
        assert!(matches!(
            service.hard_delete(other.id, post.id).await,
            Err(SocialError::PermissionDenied(_))
        ));
        service.restore(admin.id, post.id).await.unwrap();
    }

    #[tokio::test]
    async fn soft_deleting_twice_is_not_found() {
        let (service, _store, owner, _other, _admin) = setup().await;
        let post = service.create_post(owner.id, "Once".into(), None).await.unwrap();
        service.soft_delete(owner.id, post.id).await.unwrap();
        assert!(matches!(
            service.soft_delete(owner.id, post.id).await,
            Err(SocialError::NotFound("post"))
        ));
    }

    #[tokio::test]
    async fn hard_delete_is_irreversible_and_cascades() {
        let (service, store, owner, other, _admin) = setup().await;
        let post = service.create_post(owner.id, "Gone".into(), None).await.unwrap();
        let comment = store
            .insert_comment(NewComment {
                post_id: post.id,
                author_id: other.id,
                parent_id: None,
                depth: 1,
                content: "bye".into(),
            })
            .await
            .unwrap();
        store.insert_like(other.id, LikeTarget::Post(post.id)).await.unwrap();
        service.soft_delete(owner.id, post.id).await.unwrap();

        service.hard_delete(owner.id, post.id).await.unwrap();

        assert!(store.find_live_post(post.id).await.unwrap().is_none());
        assert!(store
            .find_post_including_tombstoned(post.id)
            .await
            .unwrap()
            .is_none());
        assert!(store.find_comment(comment.id).await.unwrap().is_none());
        assert!(matches!(
            service.restore(owner.id, post.id).await,
            Err(SocialError::NotFound("post"))
        ));

        let again = service.create_post(owner.id, "Gone".into(), None).await.unwrap();
        assert_eq!(again.slug, "gone");
        assert!(again.is_live());
    }

    #[tokio::test]
    async fn duplicate_titles_get_distinct_slugs() {
        let (service, _store, owner, _other, _admin) = setup().await;
        let first = service.create_post(owner.id, "Same".into(), None).await.unwrap();
        let second = service.create_post(owner.id, "Same".into(), None).await.unwrap();
        assert_eq!(first.slug, "same");
        assert!(second.slug.starts_with("same-"));
        assert_ne!(first.slug, second.slug);
    }
}
