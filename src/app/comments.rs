use std::sync::Arc;

use uuid::Uuid;

use crate::app::events::{EventSink, Outbox};
use crate::domain::engagement::{build_thread, Comment, CommentNode, NewComment};
use crate::domain::error::{SocialError, SocialResult};
use crate::domain::event::{CommentCreated, DomainEvent};
use crate::domain::user::User;
use crate::infra::store::Store;

pub const DEFAULT_MAX_DEPTH: i32 = 2;

#[derive(Clone)]
pub struct CommentService {
    store: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
    max_depth: i32,
}

impl CommentService {
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventSink>, max_depth: i32) -> Self {
        Self {
            store,
            events,
            max_depth: max_depth.max(1),
        }
    }

    /// Creates a root comment or a reply. Depth is checked before anything
    /// is written; the post owner is notified in both cases.
    pub async fn add_comment(
        &self,
        author_id: Uuid,
        post_id: Uuid,
        content: String,
        parent_id: Option<Uuid>,
    ) -> SocialResult<Comment> {
        self.require_user(author_id).await?;
        let post = self
            .store
            .find_live_post(post_id)
            .await?
            .ok_or(SocialError::NotFound("post"))?;

        let depth = match parent_id {
            Some(parent_id) => self.parent_depth(parent_id, post.id).await? + 1,
            None => 1,
        };
        if depth > self.max_depth {
            return Err(SocialError::DepthExceeded {
                max_depth: self.max_depth,
            });
        }

        let mut outbox = Outbox::new(self.events.as_ref());
        let comment = self
            .store
            .insert_comment(NewComment {
                post_id: post.id,
                author_id,
                parent_id,
                depth,
                content,
            })
            .await?;
        outbox.stage(DomainEvent::CommentCreated(CommentCreated {
            receiver_id: post.owner_id,
            sender_id: author_id,
            post_id: post.id,
            comment_id: comment.id,
            post_title: post.title,
        }));
        outbox.commit();

        Ok(comment)
    }

    /// Root comments of a live post, each carrying its reply subtree.
    pub async fn thread_for_post(&self, post_id: Uuid) -> SocialResult<Vec<CommentNode>> {
        self.store
            .find_live_post(post_id)
            .await?
            .ok_or(SocialError::NotFound("post"))?;
        let comments = self.store.list_comments_for_post(post_id).await?;
        Ok(build_thread(comments))
    }

    pub async fn get_comment(&self, id: Uuid) -> SocialResult<Comment> {
        self.store
            .find_comment(id)
            .await?
            .ok_or(SocialError::NotFound("comment"))
    }

    pub async fn update_comment(
        &self,
        actor_id: Uuid,
        id: Uuid,
        content: String,
    ) -> SocialResult<Comment> {
        let comment = self.get_comment(id).await?;
        if comment.author_id != actor_id {
            return Err(SocialError::denied("only the author can edit this comment"));
        }
        self.store
            .update_comment_content(id, content)
            .await?
            .ok_or(SocialError::NotFound("comment"))
    }

    /// Removes the comment and every reply beneath it.
    pub async fn delete_comment(&self, actor_id: Uuid, id: Uuid) -> SocialResult<()> {
        let actor = self.require_user(actor_id).await?;
        let comment = self.get_comment(id).await?;
        if !actor.can_manage(comment.author_id) {
            return Err(SocialError::denied("not allowed to delete this comment"));
        }
        if !self.store.delete_comment(id).await? {
            return Err(SocialError::NotFound("comment"));
        }
        Ok(())
    }

    /// Walks from the parent towards the root. The walk stops once the
    /// depth reaches the limit, since any reply below that is rejected.
    async fn parent_depth(&self, parent_id: Uuid, post_id: Uuid) -> SocialResult<i32> {
        let parent = self
            .store
            .find_comment(parent_id)
            .await?
            .ok_or(SocialError::NotFound("parent comment"))?;
        if parent.post_id != post_id {
            return Err(SocialError::invalid(
                "parent comment belongs to a different post",
            ));
        }

        let mut depth = 1;
        let mut next = parent.parent_id;
        while let Some(ancestor_id) = next {
            if depth >= self.max_depth {
                break;
            }
            depth += 1;
            next = self
                .store
                .find_comment(ancestor_id)
                .await?
                .and_then(|ancestor| ancestor.parent_id);
        }
        Ok(depth)
    }

    async fn require_user(&self, id: Uuid) -> SocialResult<User> {
        self.store
            .find_user(id)
            .await?
            .ok_or(SocialError::NotFound("user"))
    }
}
