use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::auth::admin::AdminError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Chat is under maintenance")]
    Maintenance,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Maintenance | AppError::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Internal(_)
            | AppError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::NotFound => "Not found".to_string(),
            AppError::Unauthorized => "Unauthorized".to_string(),
            AppError::Forbidden(msg) => msg.clone(),
            AppError::Maintenance => "Chat is under maintenance".to_string(),
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("Service unavailable: {}", msg);
                "Service temporarily unavailable".to_string()
            }
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                "Internal server error".to_string()
            }
        };

        (self.status(), Json(json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<AdminError> for AppError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::Sql(e) => AppError::Database(e),
            AdminError::Hash(e) => AppError::Internal(format!("password hash: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn not_found_returns_404() {
        assert_eq!(response_status(AppError::NotFound), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unauthorized_returns_401() {
        assert_eq!(
            response_status(AppError::Unauthorized),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn forbidden_returns_403() {
        assert_eq!(
            response_status(AppError::Forbidden("banned".into())),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn maintenance_returns_503() {
        assert_eq!(
            response_status(AppError::Maintenance),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn bad_request_returns_400() {
        assert_eq!(
            response_status(AppError::BadRequest("oops".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn internal_returns_500() {
        assert_eq!(
            response_status(AppError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn internal_detail_is_not_leaked() {
        let response = AppError::Internal("secret table name".into()).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(!body.contains("secret"));
        assert!(body.contains("Internal server error"));
    }
}
