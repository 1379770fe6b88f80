use axum::Router;

use crate::AppState;

mod auth;
mod error;
mod handlers;
mod routes;
mod ws;

pub use auth::AuthUser;
pub use error::AppError;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(routes::health())
        .merge(routes::likes())
        .merge(routes::users())
        .merge(routes::posts())
        .merge(routes::comments())
        .merge(routes::notifications())
        .merge(routes::live());

    Router::new().nest("/v1", api).with_state(state)
}
