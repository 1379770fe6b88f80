use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Follow {
    pub follower_id: Uuid,
    pub following_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Result of a follow toggle. `is_friend` is computed after the toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FollowToggle {
    pub followed: bool,
    pub is_friend: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Relationship {
    pub is_following: bool,
    pub is_followed_by: bool,
    pub is_friend: bool,
}

impl Relationship {
    pub fn new(is_following: bool, is_followed_by: bool) -> Self {
        Self {
            is_following,
            is_followed_by,
            is_friend: is_following && is_followed_by,
        }
    }
}
