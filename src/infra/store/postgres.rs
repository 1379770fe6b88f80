use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::engagement::{Comment, Like, LikeTarget, NewComment};
use crate::domain::notification::{NewNotification, Notification, NotificationType};
use crate::domain::post::{NewPost, Post, Tombstone};
use crate::domain::social_graph::Follow;
use crate::domain::user::{NewUser, Role, User};
use crate::infra::db::Db;
use crate::infra::store::{Cursor, Store, StoreError, StoreResult, SELF_FOLLOW_MESSAGE};

const FOREIGN_KEY_VIOLATION: &str = "23503";
const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";

const SELF_FOLLOW_CHECK: &str = "follows_not_self";

const POST_COLUMNS: &str = "id, owner_id, title, content, slug, created_at, deleted_at, deleted_by";
const COMMENT_COLUMNS: &str =
    "id, post_id, author_id, parent_id, depth, content, created_at, updated_at";
const NOTIFICATION_COLUMNS: &str =
    "id, receiver_id, sender_id, notification_type, message, read, created_at";

#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn db_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|code| code.into_owned()),
        _ => None,
    }
}

fn db_constraint(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint().map(str::to_string),
        _ => None,
    }
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    let role: String = row.get("role");
    let role = Role::from_db(&role).ok_or_else(|| anyhow!("unknown user role: {}", role))?;
    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        role,
        created_at: row.get("created_at"),
    })
}

fn post_from_row(row: &PgRow) -> Post {
    Post {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        content: row.get("content"),
        slug: row.get("slug"),
        created_at: row.get("created_at"),
        deleted_at: row.get("deleted_at"),
        deleted_by: row.get("deleted_by"),
    }
}

fn comment_from_row(row: &PgRow) -> Comment {
    Comment {
        id: row.get("id"),
        post_id: row.get("post_id"),
        author_id: row.get("author_id"),
        parent_id: row.get("parent_id"),
        depth: row.get("depth"),
        content: row.get("content"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn like_from_row(row: &PgRow) -> StoreResult<Like> {
    let post_id: Option<Uuid> = row.get("post_id");
    let comment_id: Option<Uuid> = row.get("comment_id");
    let target = match (post_id, comment_id) {
        (Some(id), None) => LikeTarget::Post(id),
        (None, Some(id)) => LikeTarget::Comment(id),
        _ => return Err(anyhow!("like row must reference exactly one target").into()),
    };
    Ok(Like {
        id: row.get("id"),
        user_id: row.get("user_id"),
        target,
        created_at: row.get("created_at"),
    })
}

fn notification_from_row(row: &PgRow) -> StoreResult<Notification> {
    let kind: String = row.get("notification_type");
    let notification_type = NotificationType::from_db(&kind)
        .ok_or_else(|| anyhow!("unknown notification type: {}", kind))?;
    Ok(Notification {
        id: row.get("id"),
        receiver_id: row.get("receiver_id"),
        sender_id: row.get("sender_id"),
        notification_type,
        message: row.get("message"),
        read: row.get("read"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        self.db.ping().await?;
        Ok(())
    }

    async fn insert_user(&self, new: NewUser) -> StoreResult<User> {
        let row = sqlx::query(
            "INSERT INTO users (username, role) VALUES ($1, $2) \
             RETURNING id, username, role, created_at",
        )
        .bind(&new.username)
        .bind(new.role.as_db())
        .fetch_one(self.db.pool())
        .await
        .map_err(|err| match db_code(&err).as_deref() {
            Some(UNIQUE_VIOLATION) => StoreError::Conflict("username already taken".into()),
            _ => err.into(),
        })?;

        user_from_row(&row)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT id, username, role, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<bool> {
        // posts, comments, likes and follows all cascade from users
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_post(&self, new: NewPost) -> StoreResult<Post> {
        let row = sqlx::query(&format!(
            "INSERT INTO posts (owner_id, title, content, slug) VALUES ($1, $2, $3, $4) \
             RETURNING {}",
            POST_COLUMNS
        ))
        .bind(new.owner_id)
        .bind(&new.title)
        .bind(&new.content)
        .bind(&new.slug)
        .fetch_one(self.db.pool())
        .await
        .map_err(|err| match db_code(&err).as_deref() {
            Some(UNIQUE_VIOLATION) => StoreError::Conflict("slug already in use".into()),
            Some(FOREIGN_KEY_VIOLATION) => StoreError::NotFound("user"),
            _ => err.into(),
        })?;

        Ok(post_from_row(&row))
    }

    async fn find_live_post(&self, id: Uuid) -> StoreResult<Option<Post>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM posts WHERE id = $1 AND deleted_at IS NULL",
            POST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(post_from_row))
    }

    async fn find_post_including_tombstoned(&self, id: Uuid) -> StoreResult<Option<Post>> {
        let row = sqlx::query(&format!("SELECT {} FROM posts WHERE id = $1", POST_COLUMNS))
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.as_ref().map(post_from_row))
    }

    async fn list_live_posts(&self, cursor: Option<Cursor>, limit: i64) -> StoreResult<Vec<Post>> {
        let rows = match cursor {
            Some((created_at, post_id)) => {
                sqlx::query(&format!(
                    "SELECT {} FROM posts \
                     WHERE deleted_at IS NULL \
                       AND (created_at < $1 OR (created_at = $1 AND id < $2)) \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $3",
                    POST_COLUMNS
                ))
                .bind(created_at)
                .bind(post_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM posts \
                     WHERE deleted_at IS NULL \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $1",
                    POST_COLUMNS
                ))
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        Ok(rows.iter().map(post_from_row).collect())
    }

    async fn set_post_tombstone(
        &self,
        id: Uuid,
        tombstone: Option<Tombstone>,
    ) -> StoreResult<Option<Post>> {
        let row = sqlx::query(&format!(
            "UPDATE posts SET deleted_at = $2, deleted_by = $3 WHERE id = $1 RETURNING {}",
            POST_COLUMNS
        ))
        .bind(id)
        .bind(tombstone.map(|t| t.deleted_at))
        .bind(tombstone.map(|t| t.deleted_by))
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(post_from_row))
    }

    async fn delete_post(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_comment(&self, new: NewComment) -> StoreResult<Comment> {
        // The post must still be live at the moment of insertion.
        let row = sqlx::query(&format!(
            "INSERT INTO comments (post_id, author_id, parent_id, depth, content) \
             SELECT $1, $2, $3, $4, $5 \
             WHERE EXISTS (SELECT 1 FROM posts WHERE id = $1 AND deleted_at IS NULL) \
             RETURNING {}",
            COMMENT_COLUMNS
        ))
        .bind(new.post_id)
        .bind(new.author_id)
        .bind(new.parent_id)
        .bind(new.depth)
        .bind(&new.content)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|err| match db_code(&err).as_deref() {
            Some(FOREIGN_KEY_VIOLATION) => match db_constraint(&err) {
                Some(name) if name.contains("parent") => StoreError::NotFound("parent comment"),
                Some(name) if name.contains("author") => StoreError::NotFound("user"),
                _ => StoreError::NotFound("post"),
            },
            _ => err.into(),
        })?;

        match row {
            Some(row) => Ok(comment_from_row(&row)),
            None => Err(StoreError::NotFound("post")),
        }
    }

    async fn find_comment(&self, id: Uuid) -> StoreResult<Option<Comment>> {
        let row = sqlx::query(&format!("SELECT {} FROM comments WHERE id = $1", COMMENT_COLUMNS))
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.as_ref().map(comment_from_row))
    }

    async fn list_comments_for_post(&self, post_id: Uuid) -> StoreResult<Vec<Comment>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM comments WHERE post_id = $1 ORDER BY created_at ASC, id ASC",
            COMMENT_COLUMNS
        ))
        .bind(post_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(comment_from_row).collect())
    }

    async fn update_comment_content(
        &self,
        id: Uuid,
        content: String,
    ) -> StoreResult<Option<Comment>> {
        let row = sqlx::query(&format!(
            "UPDATE comments SET content = $2, updated_at = now() WHERE id = $1 RETURNING {}",
            COMMENT_COLUMNS
        ))
        .bind(id)
        .bind(content)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(comment_from_row))
    }

    async fn delete_comment(&self, id: Uuid) -> StoreResult<bool> {
        // replies cascade through parent_id, likes through comment_id
        let result = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_like(&self, user_id: Uuid, target: LikeTarget) -> StoreResult<Option<Like>> {
        let row = sqlx::query(
            "INSERT INTO likes (user_id, post_id, comment_id) VALUES ($1, $2, $3) \
             ON CONFLICT DO NOTHING \
             RETURNING id, user_id, post_id, comment_id, created_at",
        )
        .bind(user_id)
        .bind(target.post_id())
        .bind(target.comment_id())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|err| match db_code(&err).as_deref() {
            Some(FOREIGN_KEY_VIOLATION) => match db_constraint(&err) {
                Some(name) if name.contains("user") => StoreError::NotFound("user"),
                _ => StoreError::NotFound(target.kind().label()),
            },
            _ => err.into(),
        })?;

        row.as_ref().map(like_from_row).transpose()
    }

    async fn delete_like(&self, user_id: Uuid, target: LikeTarget) -> StoreResult<bool> {
        let query = match target {
            LikeTarget::Post(_) => "DELETE FROM likes WHERE user_id = $1 AND post_id = $2",
            LikeTarget::Comment(_) => "DELETE FROM likes WHERE user_id = $1 AND comment_id = $2",
        };
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(target.id())
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn like_exists(&self, user_id: Uuid, target: LikeTarget) -> StoreResult<bool> {
        let query = match target {
            LikeTarget::Post(_) => {
                "SELECT EXISTS (SELECT 1 FROM likes WHERE user_id = $1 AND post_id = $2)"
            }
            LikeTarget::Comment(_) => {
                "SELECT EXISTS (SELECT 1 FROM likes WHERE user_id = $1 AND comment_id = $2)"
            }
        };
        let exists: bool = sqlx::query_scalar(query)
            .bind(user_id)
            .bind(target.id())
            .fetch_one(self.db.pool())
            .await?;

        Ok(exists)
    }

    async fn count_likes(&self, target: LikeTarget) -> StoreResult<i64> {
        let query = match target {
            LikeTarget::Post(_) => "SELECT COUNT(*) FROM likes WHERE post_id = $1",
            LikeTarget::Comment(_) => "SELECT COUNT(*) FROM likes WHERE comment_id = $1",
        };
        let count: i64 = sqlx::query_scalar(query)
            .bind(target.id())
            .fetch_one(self.db.pool())
            .await?;

        Ok(count)
    }

    async fn insert_follow(
        &self,
        follower_id: Uuid,
        following_id: Uuid,
    ) -> StoreResult<Option<Follow>> {
        let row = sqlx::query(
            "INSERT INTO follows (follower_id, following_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING \
             RETURNING follower_id, following_id, created_at",
        )
        .bind(follower_id)
        .bind(following_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|err| match db_code(&err).as_deref() {
            Some(FOREIGN_KEY_VIOLATION) => StoreError::NotFound("user"),
            Some(CHECK_VIOLATION) if db_constraint(&err).as_deref() == Some(SELF_FOLLOW_CHECK) => {
                StoreError::Conflict(SELF_FOLLOW_MESSAGE.into())
            }
            _ => err.into(),
        })?;

        Ok(row.map(|row| Follow {
            follower_id: row.get("follower_id"),
            following_id: row.get("following_id"),
            created_at: row.get("created_at"),
        }))
    }

    async fn delete_follow(&self, follower_id: Uuid, following_id: Uuid) -> StoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND following_id = $2")
                .bind(follower_id)
                .bind(following_id)
                .execute(self.db.pool())
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn follow_exists(&self, follower_id: Uuid, following_id: Uuid) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM follows WHERE follower_id = $1 AND following_id = $2)",
        )
        .bind(follower_id)
        .bind(following_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(exists)
    }

    async fn list_followers(&self, user_id: Uuid) -> StoreResult<Vec<User>> {
        let rows = sqlx::query(
            "SELECT u.id, u.username, u.role, u.created_at \
             FROM follows f \
             JOIN users u ON u.id = f.follower_id \
             WHERE f.following_id = $1 \
             ORDER BY f.created_at DESC, f.follower_id DESC",
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(user_from_row).collect()
    }

    async fn list_following(&self, user_id: Uuid) -> StoreResult<Vec<User>> {
        let rows = sqlx::query(
            "SELECT u.id, u.username, u.role, u.created_at \
             FROM follows f \
             JOIN users u ON u.id = f.following_id \
             WHERE f.follower_id = $1 \
             ORDER BY f.created_at DESC, f.following_id DESC",
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(user_from_row).collect()
    }

    async fn insert_notification(&self, new: NewNotification) -> StoreResult<Notification> {
        let row = sqlx::query(&format!(
            "INSERT INTO notifications (receiver_id, sender_id, notification_type, message) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {}",
            NOTIFICATION_COLUMNS
        ))
        .bind(new.receiver_id)
        .bind(new.sender_id)
        .bind(new.notification_type.as_db())
        .bind(&new.message)
        .fetch_one(self.db.pool())
        .await?;

        notification_from_row(&row)
    }

    async fn list_notifications(
        &self,
        receiver_id: Uuid,
        cursor: Option<Cursor>,
        limit: i64,
    ) -> StoreResult<Vec<Notification>> {
        let rows = match cursor {
            Some((created_at, notification_id)) => {
                sqlx::query(&format!(
                    "SELECT {} FROM notifications \
                     WHERE receiver_id = $1 \
                       AND (created_at < $2 OR (created_at = $2 AND id < $3)) \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $4",
                    NOTIFICATION_COLUMNS
                ))
                .bind(receiver_id)
                .bind(created_at)
                .bind(notification_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM notifications \
                     WHERE receiver_id = $1 \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $2",
                    NOTIFICATION_COLUMNS
                ))
                .bind(receiver_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        rows.iter().map(notification_from_row).collect()
    }

    async fn mark_notification_read(&self, id: Uuid, receiver_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET read = TRUE WHERE id = $1 AND receiver_id = $2",
        )
        .bind(id)
        .bind(receiver_id)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_read_notifications(&self, older_than: OffsetDateTime) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE read AND created_at < $1")
            .bind(older_than)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected())
    }
}
