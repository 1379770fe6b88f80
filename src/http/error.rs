use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::error::SocialError;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<SocialError> for AppError {
    fn from(err: SocialError) -> Self {
        match err {
            SocialError::NotFound(_) => Self::not_found(err.to_string()),
            SocialError::InvalidRequest(message) => Self::bad_request(message),
            SocialError::Conflict(message) => Self::conflict(message),
            SocialError::DepthExceeded { .. } => Self::unprocessable(err.to_string()),
            SocialError::PermissionDenied(message) => Self::forbidden(message),
            SocialError::Unauthorized(message) => Self::unauthorized(message),
            SocialError::Internal(err) => {
                tracing::error!(error = ?err, "request failed");
                Self::internal("internal error")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn social_errors_map_to_statuses() {
        let cases = [
            (SocialError::NotFound("post"), StatusCode::NOT_FOUND),
            (SocialError::invalid("bad"), StatusCode::BAD_REQUEST),
            (SocialError::conflict("dup"), StatusCode::CONFLICT),
            (
                SocialError::DepthExceeded { max_depth: 2 },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (SocialError::denied("no"), StatusCode::FORBIDDEN),
            (SocialError::unauthorized("who"), StatusCode::UNAUTHORIZED),
            (
                SocialError::Internal(anyhow::anyhow!("db down")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let err = AppError::from(SocialError::Internal(anyhow::anyhow!("password=hunter2")));
        assert_eq!(err.message, "internal error");
    }
}
