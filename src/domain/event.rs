use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::engagement::LikeTarget;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentCreated {
    /// Always the post owner, including for nested replies.
    pub receiver_id: Uuid,
    pub sender_id: Uuid,
    pub post_id: Uuid,
    pub comment_id: Uuid,
    pub post_title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikeToggled {
    pub actor_id: Uuid,
    /// Author of the liked target; used for routing only.
    pub owner_id: Uuid,
    pub target: LikeTarget,
    pub now_liked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFollower {
    pub follower_id: Uuid,
    pub following_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    CommentCreated(CommentCreated),
    LikeToggled(LikeToggled),
    NewFollower(NewFollower),
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CommentCreated(_) => "comment_created",
            Self::LikeToggled(_) => "like_toggled",
            Self::NewFollower(_) => "new_follower",
        }
    }

    /// Events sharing a key are handled by the same worker, in publish order.
    pub fn shard_key(&self) -> Uuid {
        match self {
            Self::CommentCreated(event) => event.post_id,
            Self::LikeToggled(event) => event.target.id(),
            Self::NewFollower(event) => event.following_id,
        }
    }
}
