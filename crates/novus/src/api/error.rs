use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use novus_core::tool::ResolveError;
use serde_json::json;

/// An error answered to an API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No session with this id exists.
    #[error("no session with id `{0}`")]
    SessionNotFound(String),
    /// The session exists but its agent has stopped.
    #[error("session `{0}` has ended")]
    SessionEnded(String),
    /// A tool result could not be delivered.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The request body is malformed.
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::SessionNotFound(_)
            | ApiError::SessionEnded(_)
            | ApiError::Resolve(ResolveError::UnknownCall(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Resolve(ResolveError::ToolMismatch { .. }) => {
                StatusCode::CONFLICT
            }
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        debug!("request failed with {status}: {self}");
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
