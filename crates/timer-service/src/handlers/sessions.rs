//! Session creation handler.
//!
//! - `POST /api/session` - allocate a session code and controller token
//!
//! The body is optional. An empty body (or `{}`) creates a five minute
//! timer with overtime disabled.

use crate::errors::TimerError;
use crate::models::{CreateSessionRequest, CreateSessionResponse};
use crate::routes::AppState;
use axum::{body::Bytes, extract::State, Json};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Handler for POST /api/session
///
/// # Response
///
/// - 200 OK: `{code, controllerToken, controlUrl, displayUrl}`
/// - 400 Bad Request: body is not JSON, or `presetMs` is invalid
/// - 503 Service Unavailable: server is shutting down
#[instrument(skip_all, name = "timer.sessions.create")]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<CreateSessionResponse>, TimerError> {
    let request = parse_request(&body)?;
    let preset_duration_ms = request
        .preset_duration_ms()
        .map_err(TimerError::BadRequest)?;
    let allow_overtime = request.allow_overtime();

    let created = state
        .registry
        .create_session(preset_duration_ms, allow_overtime)
        .await?;

    info!(
        target: "timer.handlers.sessions",
        code = %created.code,
        preset_duration_ms,
        allow_overtime,
        expires_at = created.expires_at,
        "Session created"
    );

    Ok(Json(CreateSessionResponse::new(
        created.code,
        created.controller_token.expose_secret().to_string(),
    )))
}

/// Parse the optional JSON body. Content-Type is not enforced.
fn parse_request(body: &[u8]) -> Result<CreateSessionRequest, TimerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CreateSessionRequest::default());
    }

    serde_json::from_slice(body).map_err(|e| {
        debug!(target: "timer.handlers.sessions", error = %e, "Rejecting session body");
        TimerError::BadRequest("Request body must be a JSON object".to_string())
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_PRESET_MS;

    #[test]
    fn test_parse_request_empty_body_uses_defaults() {
        for body in [&b""[..], b"  \n", b"{}"] {
            let request = parse_request(body).unwrap();
            assert_eq!(request.preset_duration_ms(), Ok(DEFAULT_PRESET_MS));
            assert!(!request.allow_overtime());
        }
    }

    #[test]
    fn test_parse_request_reads_fields() {
        let request = parse_request(br#"{"presetMs":60000,"allowOvertime":true}"#).unwrap();
        assert_eq!(request.preset_duration_ms(), Ok(60_000));
        assert!(request.allow_overtime());
    }

    #[test]
    fn test_parse_request_rejects_invalid_json() {
        assert!(matches!(
            parse_request(b"not json"),
            Err(TimerError::BadRequest(_))
        ));
        assert!(matches!(
            parse_request(b"[1,2]"),
            Err(TimerError::BadRequest(_))
        ));
    }
}
