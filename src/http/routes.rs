use axum::{routing::delete, routing::get, routing::post, Router};

use crate::http::{handlers, ws};
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn likes() -> Router<AppState> {
    Router::new()
        .route("/likes/toggle", post(handlers::toggle_like))
        .route("/posts/:id/likes", get(handlers::post_likes))
        .route("/comments/:id/likes", get(handlers::comment_likes))
}

pub fn users() -> Router<AppState> {
    Router::new()
        .route(
            "/users/:id/follow",
            post(handlers::follow_user).delete(handlers::unfollow_user),
        )
        .route("/users/:id/follow/toggle", post(handlers::toggle_follow))
        .route("/users/:id/followers", get(handlers::list_followers))
        .route("/users/:id/following", get(handlers::list_following))
        .route("/users/:id/relationship", get(handlers::relationship))
}

pub fn posts() -> Router<AppState> {
    Router::new()
        .route("/posts", post(handlers::create_post).get(handlers::list_posts))
        .route(
            "/posts/:id",
            get(handlers::get_post).delete(handlers::soft_delete_post),
        )
        .route("/posts/:id/restore", post(handlers::restore_post))
        .route("/posts/:id/permanent", delete(handlers::hard_delete_post))
        .route(
            "/posts/:id/comments",
            post(handlers::create_comment).get(handlers::list_post_comments),
        )
}

pub fn comments() -> Router<AppState> {
    Router::new().route(
        "/comments/:id",
        get(handlers::get_comment)
            .patch(handlers::update_comment)
            .delete(handlers::delete_comment),
    )
}

pub fn notifications() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(handlers::list_notifications))
        .route(
            "/notifications/:id/read",
            post(handlers::mark_notification_read),
        )
}

pub fn live() -> Router<AppState> {
    Router::new().route("/ws", get(ws::connect))
}
