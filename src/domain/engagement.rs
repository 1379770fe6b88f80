use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::error::SocialError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    Post,
    Comment,
}

impl TargetType {
    /// Noun used in rendered notification text.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
        }
    }
}

impl FromStr for TargetType {
    type Err = SocialError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "POST" => Ok(Self::Post),
            "COMMENT" => Ok(Self::Comment),
            _ => Err(SocialError::invalid(format!(
                "unsupported target type: {}",
                value
            ))),
        }
    }
}

/// A like points at exactly one post or exactly one comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LikeTarget {
    Post(Uuid),
    Comment(Uuid),
}

impl LikeTarget {
    pub fn new(kind: TargetType, id: Uuid) -> Self {
        match kind {
            TargetType::Post => Self::Post(id),
            TargetType::Comment => Self::Comment(id),
        }
    }

    pub fn kind(&self) -> TargetType {
        match self {
            Self::Post(_) => TargetType::Post,
            Self::Comment(_) => TargetType::Comment,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Post(id) | Self::Comment(id) => *id,
        }
    }

    pub fn post_id(&self) -> Option<Uuid> {
        match self {
            Self::Post(id) => Some(*id),
            Self::Comment(_) => None,
        }
    }

    pub fn comment_id(&self) -> Option<Uuid> {
        match self {
            Self::Comment(id) => Some(*id),
            Self::Post(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Like {
    pub id: Uuid,
    pub user_id: Uuid,
    pub target: LikeTarget,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub parent_id: Option<Uuid>,
    /// 1 for a root comment, parent depth + 1 for a reply. Fixed at insertion.
    pub depth: i32,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub depth: i32,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

/// Arranges a flat list of comments into root nodes carrying their reply
/// subtrees. Input order is kept among siblings; comments whose parent is
/// not in the list are dropped.
pub fn build_thread(comments: Vec<Comment>) -> Vec<CommentNode> {
    let mut children: HashMap<Uuid, Vec<Comment>> = HashMap::new();
    let mut roots = Vec::new();
    for comment in comments {
        match comment.parent_id {
            Some(parent_id) => children.entry(parent_id).or_default().push(comment),
            None => roots.push(comment),
        }
    }

    roots
        .into_iter()
        .map(|root| attach_replies(root, &mut children))
        .collect()
}

fn attach_replies(comment: Comment, children: &mut HashMap<Uuid, Vec<Comment>>) -> CommentNode {
    let replies = children
        .remove(&comment.id)
        .unwrap_or_default()
        .into_iter()
        .map(|reply| attach_replies(reply, children))
        .collect();
    CommentNode { comment, replies }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: Uuid, parent_id: Option<Uuid>, depth: i32) -> Comment {
        let now = OffsetDateTime::now_utc();
        Comment {
            id,
            post_id: Uuid::nil(),
            author_id: Uuid::nil(),
            parent_id,
            depth,
            content: format!("comment {}", id),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn target_type_parses_case_insensitively() {
        assert_eq!("post".parse::<TargetType>().unwrap(), TargetType::Post);
        assert_eq!("COMMENT".parse::<TargetType>().unwrap(), TargetType::Comment);
        assert!(matches!(
            "story".parse::<TargetType>(),
            Err(SocialError::InvalidRequest(_))
        ));
    }

    #[test]
    fn unsupported_target_type_echoes_the_raw_input() {
        match " Story ".parse::<TargetType>() {
            Err(SocialError::InvalidRequest(message)) => {
                assert_eq!(message, "unsupported target type:  Story ")
            }
            other => panic!("expected InvalidRequest, got {:?}", other),
        }
    }

    #[test]
    fn build_thread_nests_replies_under_roots() {
        let root_a = Uuid::new_v4();
        let root_b = Uuid::new_v4();
        let reply = Uuid::new_v4();
        let nested = Uuid::new_v4();

        let thread = build_thread(vec![
            comment(root_a, None, 1),
            comment(reply, Some(root_a), 2),
            comment(root_b, None, 1),
            comment(nested, Some(reply), 3),
        ]);

        assert_eq!(thread.len(), 2);
        assert_eq!(thread[0].comment.id, root_a);
        assert_eq!(thread[1].comment.id, root_b);
        assert_eq!(thread[0].replies.len(), 1);
        assert_eq!(thread[0].replies[0].comment.id, reply);
        assert_eq!(thread[0].replies[0].replies[0].comment.id, nested);
        assert!(thread[1].replies.is_empty());
    }

    #[test]
    fn like_target_exposes_exactly_one_side() {
        let id = Uuid::new_v4();
        let target = LikeTarget::new(TargetType::Comment, id);
        assert_eq!(target.comment_id(), Some(id));
        assert_eq!(target.post_id(), None);
        assert_eq!(target.kind(), TargetType::Comment);
    }
}
