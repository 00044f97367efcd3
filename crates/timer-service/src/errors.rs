//! Timer service error types.
//!
//! Real-time protocol errors are reported to the originating connection as
//! `{"type":"error","message":...}` using [`TimerError::client_message`].
//! HTTP-facing errors map to status codes via the `IntoResponse` impl.
//! Internal details are logged server-side and never sent to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Timer service error type.
///
/// Maps to HTTP status codes:
/// - `SessionNotFound`: 404 Not Found
/// - `Unauthorized`: 401 Unauthorized
/// - `ControllerConflict`: 409 Conflict
/// - `MalformedMessage`, `BadRequest`: 400 Bad Request
/// - `Draining`: 503 Service Unavailable
/// - `Internal`: 500 Internal Server Error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// No live session has the requested code.
    #[error("Session not found")]
    SessionNotFound,

    /// Controller join presented a token that is not the session's token.
    #[error("Unauthorized")]
    Unauthorized,

    /// A distinct controller already holds the session.
    #[error("Another controller is already connected")]
    ControllerConflict,

    /// Inbound frame was not a recognizable protocol message.
    #[error("Malformed message")]
    MalformedMessage,

    /// HTTP request body failed validation.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Registry is shutting down and refuses new sessions.
    #[error("Service is draining")]
    Draining,

    /// Internal failure (actor mailbox, RNG).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TimerError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            TimerError::SessionNotFound => "SESSION_NOT_FOUND",
            TimerError::Unauthorized => "UNAUTHORIZED",
            TimerError::ControllerConflict => "CONTROLLER_CONFLICT",
            TimerError::MalformedMessage => "MALFORMED_MESSAGE",
            TimerError::BadRequest(_) => "BAD_REQUEST",
            TimerError::Draining => "SERVICE_UNAVAILABLE",
            TimerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            TimerError::SessionNotFound => StatusCode::NOT_FOUND,
            TimerError::Unauthorized => StatusCode::UNAUTHORIZED,
            TimerError::ControllerConflict => StatusCode::CONFLICT,
            TimerError::MalformedMessage | TimerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            TimerError::Draining => StatusCode::SERVICE_UNAVAILABLE,
            TimerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-safe message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            TimerError::Internal(_) => "An internal error occurred".to_string(),
            TimerError::Draining => "Server is shutting down, please try again".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for TimerError {
    fn into_response(self) -> Response {
        if let TimerError::Internal(reason) = &self {
            tracing::error!(target: "timer.errors", reason = %reason, "Internal error");
        }

        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_client_messages_match_wire_text() {
        assert_eq!(
            TimerError::SessionNotFound.client_message(),
            "Session not found"
        );
        assert_eq!(TimerError::Unauthorized.client_message(), "Unauthorized");
        assert_eq!(
            TimerError::ControllerConflict.client_message(),
            "Another controller is already connected"
        );
    }

    #[test]
    fn test_internal_details_not_exposed() {
        let error = TimerError::Internal("mailbox closed for 7KQ2M9".to_string());
        assert_eq!(error.client_message(), "An internal error occurred");
        assert!(error.to_string().contains("mailbox closed"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            TimerError::SessionNotFound.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            TimerError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            TimerError::ControllerConflict.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            TimerError::BadRequest("x".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            TimerError::Draining.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            TimerError::Internal("x".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_into_response_bad_request() {
        let response =
            TimerError::BadRequest("presetMs must be non-negative".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
        assert_eq!(
            body["error"]["message"],
            "Bad request: presetMs must be non-negative"
        );
    }

    #[tokio::test]
    async fn test_into_response_internal_is_generic() {
        let response = TimerError::Internal("rng failure".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body["error"]["message"], "An internal error occurred");
    }
}
