//! Error types for the Ingress API.
//!
//! [`ApiError`] unifies every failure a request can hit into a single
//! enum that converts into an Axum HTTP response via its
//! [`IntoResponse`] implementation. The body is always
//! `{"error": message, "status": code}`.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tallyboard_core::{Rejection, RejectionKind};
use tallyboard_snapshot::SnapshotError;

/// Errors that can occur in the Ingress API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The event store refused the mutation.
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// The request body was missing, not JSON, or the wrong shape.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// A path parameter could not be parsed.
    #[error("invalid path parameter: {0}")]
    InvalidPath(String),

    /// The session layer did not authorize this caller.
    #[error("not authorized")]
    Unauthorized,

    /// A snapshot operation failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl ApiError {
    /// HTTP status this error maps to.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Rejected(Rejection::LockedForWrites) => StatusCode::FORBIDDEN,
            Self::Rejected(rejection) => match rejection.kind() {
                RejectionKind::Validation => StatusCode::BAD_REQUEST,
                RejectionKind::Reference => StatusCode::NOT_FOUND,
                RejectionKind::Conflict => StatusCode::CONFLICT,
            },
            Self::InvalidBody(_) | Self::InvalidPath(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Snapshot(SnapshotError::InvalidId(_)) => StatusCode::BAD_REQUEST,
            Self::Snapshot(SnapshotError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Snapshot(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
