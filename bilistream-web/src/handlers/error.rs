//! Mapping of pipeline failures onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bilistream_core::{ApiError, BilistreamError, KeyCacheError, MediaError};
use serde_json::json;

/// Upstream codes meaning the video or page does not exist.
const NOT_FOUND_CODES: [i64; 2] = [-404, 62002];

/// Upstream codes meaning access was refused.
const FORBIDDEN_CODES: [i64; 3] = [-403, -101, -352];

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    /// A query parameter failed validation.
    #[error("Invalid request: {reason}")]
    InvalidInput {
        /// What was wrong with the request.
        reason: String,
    },

    /// The download pipeline failed.
    #[error(transparent)]
    Core(#[from] BilistreamError),
}

impl WebError {
    /// Stage label reported in the error body.
    pub fn stage(&self) -> &'static str {
        match self {
            WebError::InvalidInput { .. } => "input",
            WebError::Core(e) => e.stage(),
        }
    }

    fn message(&self) -> String {
        match self {
            WebError::InvalidInput { reason } => reason.clone(),
            WebError::Core(e) => e.user_message(),
        }
    }
}

/// HTTP status for a pipeline failure.
pub fn status_for(error: &BilistreamError) -> StatusCode {
    match error {
        BilistreamError::Api(api) => match api {
            ApiError::InvalidVideoId { .. } => StatusCode::BAD_REQUEST,
            ApiError::PageNotFound { .. } | ApiError::StreamAbsent { .. } => StatusCode::NOT_FOUND,
            ApiError::Rejected { code, .. } if NOT_FOUND_CODES.contains(code) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Rejected { code, .. } if FORBIDDEN_CODES.contains(code) => {
                StatusCode::FORBIDDEN
            }
            ApiError::Unavailable { .. }
            | ApiError::Keys(KeyCacheError::UpstreamUnavailable { .. }) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        BilistreamError::Media(MediaError::FetchFailed { .. }) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            WebError::Core(e) => status_for(e),
        };

        if status.is_server_error() {
            tracing::error!(%status, stage = self.stage(), error = %self, "Download request failed");
        } else {
            tracing::warn!(%status, stage = self.stage(), error = %self, "Download request rejected");
        }

        let body = json!({
            "error": self.message(),
            "stage": self.stage(),
        });
        (status, Json(body)).into_response()
    }
}
