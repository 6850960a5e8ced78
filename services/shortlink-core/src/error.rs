use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Error taxonomy for the HTTP surface. Mirrors §7 of the design: NotFound,
/// Validation, TransientStore, Collision each map to one status code and
/// never retry on the hot path.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("short code space exhausted after retries")]
    Collision,
    #[error("store unavailable: {0}")]
    TransientStore(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<crate::store::StoreError> for AppError {
    fn from(err: crate::store::StoreError) -> Self {
        match err {
            crate::store::StoreError::Collision => AppError::Collision,
            crate::store::StoreError::Db(e) => AppError::TransientStore(e.to_string()),
        }
    }
}

impl From<crate::resolver::ResolveError> for AppError {
    fn from(err: crate::resolver::ResolveError) -> Self {
        match err {
            crate::resolver::ResolveError::NotFound => AppError::NotFound,
            crate::resolver::ResolveError::Timeout => {
                AppError::TransientStore("primary store timed out".to_string())
            }
            crate::resolver::ResolveError::Store(e) => e.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Collision => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::TransientStore(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        (status, Json(serde_json::json!({ "detail": message }))).into_response()
    }
}
