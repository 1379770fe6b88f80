use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::comments::CommentService;
use crate::app::follows::FollowService;
use crate::app::likes::{LikeService, LikeSummary};
use crate::app::notifications::NotificationService;
use crate::app::posts::PostService;
use crate::domain::engagement::{Comment, CommentNode, LikeTarget, TargetType};
use crate::domain::notification::Notification;
use crate::domain::post::Post;
use crate::domain::social_graph::{FollowToggle, Relationship};
use crate::domain::user::User;
use crate::http::{AppError, AuthUser};
use crate::AppState;

const DEFAULT_PAGE_LIMIT: i64 = 20;
const MAX_PAGE_LIMIT: i64 = 200;
const MAX_TITLE_LEN: usize = 255;
const MAX_COMMENT_LEN: usize = 1000;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

fn parse_cursor(cursor: Option<String>) -> Result<Option<(OffsetDateTime, Uuid)>, AppError> {
    let Some(cursor) = cursor else {
        return Ok(None);
    };

    let mut parts = cursor.splitn(2, '/');
    let timestamp = parts
        .next()
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;
    let id = parts
        .next()
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;

    let timestamp = OffsetDateTime::parse(timestamp, &Rfc3339)
        .map_err(|_| AppError::bad_request("invalid cursor"))?;
    let id = Uuid::parse_str(id).map_err(|_| AppError::bad_request("invalid cursor"))?;

    Ok(Some((timestamp, id)))
}

fn encode_cursor(cursor: Option<(OffsetDateTime, Uuid)>) -> Option<String> {
    let (timestamp, id) = cursor?;
    let timestamp = timestamp.format(&Rfc3339).ok()?;
    Some(format!("{}/{}", timestamp, id))
}

fn page_limit(limit: Option<i64>) -> Result<i64, AppError> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(AppError::bad_request(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_LIMIT
        )));
    }
    Ok(limit)
}

/// Splits off the probe row fetched past `limit` and turns the last kept
/// item into the next cursor.
fn paginate<T>(
    mut items: Vec<T>,
    limit: i64,
    key: impl Fn(&T) -> (OffsetDateTime, Uuid),
) -> ListResponse<T> {
    let next_cursor = if items.len() > limit as usize {
        items.truncate(limit as usize);
        encode_cursor(items.last().map(key))
    } else {
        None
    };
    ListResponse { items, next_cursor }
}

fn validate_comment(content: &str) -> Result<(), AppError> {
    if content.trim().is_empty() {
        return Err(AppError::bad_request("content is required"));
    }
    if content.chars().count() > MAX_COMMENT_LEN {
        return Err(AppError::bad_request(format!(
            "content must be at most {} characters",
            MAX_COMMENT_LEN
        )));
    }
    Ok(())
}

fn like_service(state: &AppState) -> LikeService {
    LikeService::new(state.store.clone(), state.events.clone())
}

fn follow_service(state: &AppState) -> FollowService {
    FollowService::new(state.store.clone(), state.events.clone())
}

fn comment_service(state: &AppState) -> CommentService {
    CommentService::new(
        state.store.clone(),
        state.events.clone(),
        state.comment_max_depth,
    )
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.store.ping().await.is_ok();
    let relay = match &state.relay {
        Some(relay) => relay.ping().await.is_ok(),
        None => true,
    };
    let status = if store && relay { "ok" } else { "degraded" };

    Json(HealthResponse { status })
}

// ---------------------------------------------------------------------------
// Likes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ToggleLikeRequest {
    pub target_type: String,
    pub target_id: Uuid,
}

#[derive(Serialize)]
pub struct ToggleLikeResponse {
    pub liked: bool,
}

pub async fn toggle_like(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Json(payload): Json<ToggleLikeRequest>,
) -> Result<Json<ToggleLikeResponse>, AppError> {
    let kind: TargetType = payload.target_type.parse()?;
    let target = LikeTarget::new(kind, payload.target_id);
    let liked = like_service(&state).toggle_like(user_id, target).await?;
    Ok(Json(ToggleLikeResponse { liked }))
}

pub async fn post_likes(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Path(post_id): Path<Uuid>,
) -> Result<Json<LikeSummary>, AppError> {
    let summary = like_service(&state)
        .summary(user_id, LikeTarget::Post(post_id))
        .await?;
    Ok(Json(summary))
}

pub async fn comment_likes(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Path(comment_id): Path<Uuid>,
) -> Result<Json<LikeSummary>, AppError> {
    let summary = like_service(&state)
        .summary(user_id, LikeTarget::Comment(comment_id))
        .await?;
    Ok(Json(summary))
}

// ---------------------------------------------------------------------------
// Follows
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct FollowResponse {
    pub followed: bool,
}

#[derive(Serialize)]
pub struct UnfollowResponse {
    pub unfollowed: bool,
}

pub async fn follow_user(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Path(target_id): Path<Uuid>,
) -> Result<Json<FollowResponse>, AppError> {
    follow_service(&state).follow(user_id, target_id).await?;
    Ok(Json(FollowResponse { followed: true }))
}

pub async fn unfollow_user(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Path(target_id): Path<Uuid>,
) -> Result<Json<UnfollowResponse>, AppError> {
    let unfollowed = follow_service(&state).unfollow(user_id, target_id).await?;
    Ok(Json(UnfollowResponse { unfollowed }))
}

pub async fn toggle_follow(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Path(target_id): Path<Uuid>,
) -> Result<Json<FollowToggle>, AppError> {
    let toggle = follow_service(&state)
        .toggle_follow(user_id, target_id)
        .await?;
    Ok(Json(toggle))
}

pub async fn list_followers(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ListResponse<User>>, AppError> {
    let items = follow_service(&state).followers(user_id).await?;
    Ok(Json(ListResponse {
        items,
        next_cursor: None,
    }))
}

pub async fn list_following(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ListResponse<User>>, AppError> {
    let items = follow_service(&state).following(user_id).await?;
    Ok(Json(ListResponse {
        items,
        next_cursor: None,
    }))
}

pub async fn relationship(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Path(other_id): Path<Uuid>,
) -> Result<Json<Relationship>, AppError> {
    let relationship = follow_service(&state)
        .relationship(user_id, other_id)
        .await?;
    Ok(Json(relationship))
}

// ---------------------------------------------------------------------------
// Posts
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: Option<String>,
}

pub async fn create_post(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Json(payload): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<Post>), AppError> {
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::bad_request("title is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::bad_request(format!(
            "title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }

    let post = PostService::new(state.store.clone())
        .create_post(user_id, title, payload.content)
        .await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<Post>>, AppError> {
    let limit = page_limit(query.limit)?;
    let cursor = parse_cursor(query.cursor)?;
    let posts = PostService::new(state.store.clone())
        .list_live(cursor, limit + 1)
        .await?;
    Ok(Json(paginate(posts, limit, |post| (post.created_at, post.id))))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<Json<Post>, AppError> {
    let post = PostService::new(state.store.clone()).get_live(post_id).await?;
    Ok(Json(post))
}

pub async fn soft_delete_post(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Path(post_id): Path<Uuid>,
) -> Result<Json<Post>, AppError> {
    let post = PostService::new(state.store.clone())
        .soft_delete(user_id, post_id)
        .await?;
    Ok(Json(post))
}

pub async fn restore_post(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Path(post_id): Path<Uuid>,
) -> Result<Json<Post>, AppError> {
    let post = PostService::new(state.store.clone())
        .restore(user_id, post_id)
        .await?;
    Ok(Json(post))
}

pub async fn hard_delete_post(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Path(post_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    PostService::new(state.store.clone())
        .hard_delete(user_id, post_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateCommentRequest {
    pub content: String,
}

pub async fn create_comment(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Path(post_id): Path<Uuid>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    validate_comment(&payload.content)?;
    let comment = comment_service(&state)
        .add_comment(user_id, post_id, payload.content, payload.parent_id)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn list_post_comments(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<Json<ListResponse<CommentNode>>, AppError> {
    let items = comment_service(&state).thread_for_post(post_id).await?;
    Ok(Json(ListResponse {
        items,
        next_cursor: None,
    }))
}

pub async fn get_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
) -> Result<Json<Comment>, AppError> {
    let comment = comment_service(&state).get_comment(comment_id).await?;
    Ok(Json(comment))
}

pub async fn update_comment(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Path(comment_id): Path<Uuid>,
    Json(payload): Json<UpdateCommentRequest>,
) -> Result<Json<Comment>, AppError> {
    validate_comment(&payload.content)?;
    let comment = comment_service(&state)
        .update_comment(user_id, comment_id, payload.content)
        .await?;
    Ok(Json(comment))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Path(comment_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    comment_service(&state)
        .delete_comment(user_id, comment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

pub async fn list_notifications(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<Notification>>, AppError> {
    let limit = page_limit(query.limit)?;
    let cursor = parse_cursor(query.cursor)?;
    let notifications = NotificationService::new(state.store.clone())
        .list(user_id, cursor, limit + 1)
        .await?;
    Ok(Json(paginate(notifications, limit, |notification| {
        (notification.created_at, notification.id)
    })))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    AuthUser { user_id }: AuthUser,
    Path(notification_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    NotificationService::new(state.store.clone())
        .mark_read(user_id, notification_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
