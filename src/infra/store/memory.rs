use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::engagement::{Comment, Like, LikeTarget, NewComment};
use crate::domain::notification::{NewNotification, Notification};
use crate::domain::post::{NewPost, Post, Tombstone};
use crate::domain::social_graph::Follow;
use crate::domain::user::{NewUser, User};
use crate::infra::store::{Cursor, Store, StoreError, StoreResult, SELF_FOLLOW_MESSAGE};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    posts: HashMap<Uuid, Post>,
    comments: HashMap<Uuid, Comment>,
    // keyed the same way as the unique indexes in Postgres
    likes: HashMap<(Uuid, LikeTarget), Like>,
    follows: HashMap<(Uuid, Uuid), Follow>,
    notifications: HashMap<Uuid, Notification>,
}

impl State {
    fn remove_likes_where(&mut self, doomed: impl Fn(&LikeTarget) -> bool) {
        self.likes.retain(|(_, target), _| !doomed(target));
    }

    fn remove_comments(&mut self, ids: &HashSet<Uuid>) {
        self.comments.retain(|id, _| !ids.contains(id));
        self.remove_likes_where(|target| matches!(target, LikeTarget::Comment(id) if ids.contains(id)));
    }

    fn remove_post(&mut self, post_id: Uuid) -> bool {
        if self.posts.remove(&post_id).is_none() {
            return false;
        }
        let comment_ids: HashSet<Uuid> = self
            .comments
            .values()
            .filter(|comment| comment.post_id == post_id)
            .map(|comment| comment.id)
            .collect();
        self.remove_comments(&comment_ids);
        self.remove_likes_where(|target| *target == LikeTarget::Post(post_id));
        true
    }

    /// The comment plus every reply below it.
    fn comment_subtree(&self, root: Uuid) -> HashSet<Uuid> {
        let mut subtree = HashSet::from([root]);
        let mut frontier = vec![root];
        while let Some(parent) = frontier.pop() {
            for comment in self.comments.values() {
                if comment.parent_id == Some(parent) && subtree.insert(comment.id) {
                    frontier.push(comment.id);
                }
            }
        }
        subtree
    }
}

fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> (OffsetDateTime, Uuid)) {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

fn after_cursor(key: (OffsetDateTime, Uuid), cursor: Option<Cursor>) -> bool {
    match cursor {
        Some(cursor) => key < cursor,
        None => true,
    }
}

fn take_limit<T>(items: Vec<T>, limit: i64) -> Vec<T> {
    let limit = usize::try_from(limit).unwrap_or(0);
    items.into_iter().take(limit).collect()
}

/// Process-local store. Every operation runs under one lock, which gives the
/// same per-statement atomicity and uniqueness guarantees as the Postgres
/// schema.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_user(&self, new: NewUser) -> StoreResult<User> {
        let mut state = self.state();
        if state.users.values().any(|user| user.username == new.username) {
            return Err(StoreError::Conflict("username already taken".into()));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            role: new.role,
            created_at: OffsetDateTime::now_utc(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state().users.get(&id).cloned())
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state();
        if state.users.remove(&id).is_none() {
            return Ok(false);
        }

        let owned_posts: Vec<Uuid> = state
            .posts
            .values()
            .filter(|post| post.owner_id == id)
            .map(|post| post.id)
            .collect();
        for post_id in owned_posts {
            state.remove_post(post_id);
        }

        let authored: Vec<Uuid> = state
            .comments
            .values()
            .filter(|comment| comment.author_id == id)
            .map(|comment| comment.id)
            .collect();
        let mut doomed = HashSet::new();
        for comment_id in authored {
            doomed.extend(state.comment_subtree(comment_id));
        }
        state.remove_comments(&doomed);

        state.likes.retain(|(user_id, _), _| *user_id != id);
        state
            .follows
            .retain(|(follower, following), _| *follower != id && *following != id);
        for post in state.posts.values_mut() {
            if post.deleted_by == Some(id) {
                post.deleted_by = None;
            }
        }
        Ok(true)
    }

    async fn insert_post(&self, new: NewPost) -> StoreResult<Post> {
        let mut state = self.state();
        if !state.users.contains_key(&new.owner_id) {
            return Err(StoreError::NotFound("user"));
        }
        if state.posts.values().any(|post| post.slug == new.slug) {
            return Err(StoreError::Conflict("slug already in use".into()));
        }
        let post = Post {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            title: new.title,
            content: new.content,
            slug: new.slug,
            created_at: OffsetDateTime::now_utc(),
            deleted_at: None,
            deleted_by: None,
        };
        state.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn find_live_post(&self, id: Uuid) -> StoreResult<Option<Post>> {
        Ok(self.state().posts.get(&id).filter(|post| post.is_live()).cloned())
    }

    async fn find_post_including_tombstoned(&self, id: Uuid) -> StoreResult<Option<Post>> {
        Ok(self.state().posts.get(&id).cloned())
    }

    async fn list_live_posts(&self, cursor: Option<Cursor>, limit: i64) -> StoreResult<Vec<Post>> {
        let mut posts: Vec<Post> = self
            .state()
            .posts
            .values()
            .filter(|post| post.is_live())
            .filter(|post| after_cursor((post.created_at, post.id), cursor))
            .cloned()
            .collect();
        newest_first(&mut posts, |post| (post.created_at, post.id));
        Ok(take_limit(posts, limit))
    }

    async fn set_post_tombstone(
        &self,
        id: Uuid,
        tombstone: Option<Tombstone>,
    ) -> StoreResult<Option<Post>> {
        let mut state = self.state();
        let Some(post) = state.posts.get_mut(&id) else {
            return Ok(None);
        };
        post.deleted_at = tombstone.map(|t| t.deleted_at);
        post.deleted_by = tombstone.map(|t| t.deleted_by);
        Ok(Some(post.clone()))
    }

    async fn delete_post(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.state().remove_post(id))
    }

    async fn insert_comment(&self, new: NewComment) -> StoreResult<Comment> {
        let mut state = self.state();
        if !state.posts.get(&new.post_id).map_or(false, Post::is_live) {
            return Err(StoreError::NotFound("post"));
        }
        if !state.users.contains_key(&new.author_id) {
            return Err(StoreError::NotFound("user"));
        }
        if let Some(parent_id) = new.parent_id {
            if !state.comments.contains_key(&parent_id) {
                return Err(StoreError::NotFound("parent comment"));
            }
        }
        let now = OffsetDateTime::now_utc();
        let comment = Comment {
            id: Uuid::new_v4(),
            post_id: new.post_id,
            author_id: new.author_id,
            parent_id: new.parent_id,
            depth: new.depth,
            content: new.content,
            created_at: now,
            updated_at: now,
        };
        state.comments.insert(comment.id, comment.clone());
        Ok(comment)
    }

    async fn find_comment(&self, id: Uuid) -> StoreResult<Option<Comment>> {
        Ok(self.state().comments.get(&id).cloned())
    }

    async fn list_comments_for_post(&self, post_id: Uuid) -> StoreResult<Vec<Comment>> {
        let mut comments: Vec<Comment> = self
            .state()
            .comments
            .values()
            .filter(|comment| comment.post_id == post_id)
            .cloned()
            .collect();
        comments.sort_by_key(|comment| (comment.created_at, comment.id));
        Ok(comments)
    }

    async fn update_comment_content(
        &self,
        id: Uuid,
        content: String,
    ) -> StoreResult<Option<Comment>> {
        let mut state = self.state();
        let Some(comment) = state.comments.get_mut(&id) else {
            return Ok(None);
        };
        comment.content = content;
        comment.updated_at = OffsetDateTime::now_utc();
        Ok(Some(comment.clone()))
    }

    async fn delete_comment(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state();
        if !state.comments.contains_key(&id) {
            return Ok(false);
        }
        let subtree = state.comment_subtree(id);
        state.remove_comments(&subtree);
        Ok(true)
    }

    async fn insert_like(&self, user_id: Uuid, target: LikeTarget) -> StoreResult<Option<Like>> {
        let mut state = self.state();
        if !state.users.contains_key(&user_id) {
            return Err(StoreError::NotFound("user"));
        }
        let target_exists = match target {
            LikeTarget::Post(id) => state.posts.contains_key(&id),
            LikeTarget::Comment(id) => state.comments.contains_key(&id),
        };
        if !target_exists {
            return Err(StoreError::NotFound(target.kind().label()));
        }
        if state.likes.contains_key(&(user_id, target)) {
            return Ok(None);
        }
        let like = Like {
            id: Uuid::new_v4(),
            user_id,
            target,
            created_at: OffsetDateTime::now_utc(),
        };
        state.likes.insert((user_id, target), like.clone());
        Ok(Some(like))
    }

    async fn delete_like(&self, user_id: Uuid, target: LikeTarget) -> StoreResult<bool> {
        Ok(self.state().likes.remove(&(user_id, target)).is_some())
    }

    async fn like_exists(&self, user_id: Uuid, target: LikeTarget) -> StoreResult<bool> {
        Ok(self.state().likes.contains_key(&(user_id, target)))
    }

    async fn count_likes(&self, target: LikeTarget) -> StoreResult<i64> {
        let count = self
            .state()
            .likes
            .keys()
            .filter(|(_, liked)| *liked == target)
            .count();
        Ok(count as i64)
    }

    async fn insert_follow(
        &self,
        follower_id: Uuid,
        following_id: Uuid,
    ) -> StoreResult<Option<Follow>> {
        // row checks run before foreign keys in Postgres
        if follower_id == following_id {
            return Err(StoreError::Conflict(SELF_FOLLOW_MESSAGE.into()));
        }
        let mut state = self.state();
        if !state.users.contains_key(&follower_id) || !state.users.contains_key(&following_id) {
            return Err(StoreError::NotFound("user"));
        }
        if state.follows.contains_key(&(follower_id, following_id)) {
            return Ok(None);
        }
        let follow = Follow {
            follower_id,
            following_id,
            created_at: OffsetDateTime::now_utc(),
        };
        state
            .follows
            .insert((follower_id, following_id), follow.clone());
        Ok(Some(follow))
    }

    async fn delete_follow(&self, follower_id: Uuid, following_id: Uuid) -> StoreResult<bool> {
        Ok(self
            .state()
            .follows
            .remove(&(follower_id, following_id))
            .is_some())
    }

    async fn follow_exists(&self, follower_id: Uuid, following_id: Uuid) -> StoreResult<bool> {
        Ok(self
            .state()
            .follows
            .contains_key(&(follower_id, following_id)))
    }

    async fn list_followers(&self, user_id: Uuid) -> StoreResult<Vec<User>> {
        let state = self.state();
        let mut edges: Vec<&Follow> = state
            .follows
            .values()
            .filter(|follow| follow.following_id == user_id)
            .collect();
        newest_first(&mut edges, |follow| (follow.created_at, follow.follower_id));
        Ok(edges
            .into_iter()
            .filter_map(|follow| state.users.get(&follow.follower_id).cloned())
            .collect())
    }

    async fn list_following(&self, user_id: Uuid) -> StoreResult<Vec<User>> {
        let state = self.state();
        let mut edges: Vec<&Follow> = state
            .follows
            .values()
            .filter(|follow| follow.follower_id == user_id)
            .collect();
        newest_first(&mut edges, |follow| (follow.created_at, follow.following_id));
        Ok(edges
            .into_iter()
            .filter_map(|follow| state.users.get(&follow.following_id).cloned())
            .collect())
    }

    async fn insert_notification(&self, new: NewNotification) -> StoreResult<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            receiver_id: new.receiver_id,
            sender_id: new.sender_id,
            notification_type: new.notification_type,
            message: new.message,
            read: false,
            created_at: OffsetDateTime::now_utc(),
        };
        self.state()
            .notifications
            .insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn list_notifications(
        &self,
        receiver_id: Uuid,
        cursor: Option<Cursor>,
        limit: i64,
    ) -> StoreResult<Vec<Notification>> {
        let mut notifications: Vec<Notification> = self
            .state()
            .notifications
            .values()
            .filter(|notification| notification.receiver_id == receiver_id)
            .filter(|notification| after_cursor((notification.created_at, notification.id), cursor))
            .cloned()
            .collect();
        newest_first(&mut notifications, |n| (n.created_at, n.id));
        Ok(take_limit(notifications, limit))
    }

    async fn mark_notification_read(&self, id: Uuid, receiver_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state();
        match state.notifications.get_mut(&id) {
            Some(notification) if notification.receiver_id == receiver_id => {
                notification.read = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_read_notifications(&self, older_than: OffsetDateTime) -> StoreResult<u64> {
        let mut state = self.state();
        let before = state.notifications.len();
        state
            .notifications
            .retain(|_, n| !(n.read && n.created_at < older_than));
        Ok((before - state.notifications.len()) as u64)
    }
}
