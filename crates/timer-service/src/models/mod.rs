//! HTTP request and response bodies.

use serde::{Deserialize, Serialize};

/// Preset used when `POST /api/session` omits `presetMs` (5 minutes).
pub const DEFAULT_PRESET_MS: i64 = 5 * 60 * 1000;

/// Health check response.
///
/// Returned by the `/api/health` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub ok: bool,
}

/// Body of `POST /api/session`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Preset duration in milliseconds. Fractions are truncated.
    pub preset_ms: Option<f64>,

    pub allow_overtime: Option<bool>,
}

impl CreateSessionRequest {
    /// Validated preset, falling back to [`DEFAULT_PRESET_MS`].
    ///
    /// # Errors
    ///
    /// Returns a message when `presetMs` is negative or not finite.
    #[allow(clippy::cast_possible_truncation)]
    pub fn preset_duration_ms(&self) -> Result<i64, String> {
        match self.preset_ms {
            None => Ok(DEFAULT_PRESET_MS),
            Some(ms) if !ms.is_finite() => Err("presetMs must be a finite number".to_string()),
            Some(ms) if ms < 0.0 => Err("presetMs must not be negative".to_string()),
            Some(ms) => Ok(ms.trunc() as i64),
        }
    }

    #[must_use]
    pub fn allow_overtime(&self) -> bool {
        self.allow_overtime.unwrap_or(false)
    }
}

/// Response for creating a session.
///
/// The controller token appears only here; hand `controlUrl` to the
/// controller and `displayUrl` to everyone else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub code: String,
    pub controller_token: String,
    pub control_url: String,
    pub display_url: String,
}

impl CreateSessionResponse {
    #[must_use]
    pub fn new(code: String, controller_token: String) -> Self {
        let control_url = format!("/control?code={}&token={}", code, controller_token);
        let display_url = format!("/display?code={}", code);
        Self {
            code,
            controller_token,
            control_url,
            display_url,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_create_session_request_defaults() {
        let request: CreateSessionRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.preset_duration_ms(), Ok(DEFAULT_PRESET_MS));
        assert!(!request.allow_overtime());
    }

    #[test]
    fn test_create_session_request_accepts_values() {
        let request: CreateSessionRequest =
            serde_json::from_str(r#"{"presetMs": 90000.7, "allowOvertime": true}"#).unwrap();
        assert_eq!(request.preset_duration_ms(), Ok(90_000));
        assert!(request.allow_overtime());
    }

    #[test]
    fn test_create_session_request_null_means_default() {
        let request: CreateSessionRequest =
            serde_json::from_str(r#"{"presetMs": null, "allowOvertime": null}"#).unwrap();
        assert_eq!(request.preset_duration_ms(), Ok(DEFAULT_PRESET_MS));
        assert!(!request.allow_overtime());
    }

    #[test]
    fn test_create_session_request_rejects_negative() {
        let request: CreateSessionRequest = serde_json::from_str(r#"{"presetMs": -1}"#).unwrap();
        assert!(request.preset_duration_ms().is_err());
    }

    #[test]
    fn test_create_session_request_zero_is_valid() {
        let request: CreateSessionRequest = serde_json::from_str(r#"{"presetMs": 0}"#).unwrap();
        assert_eq!(request.preset_duration_ms(), Ok(0));
    }

    #[test]
    fn test_create_session_request_rejects_wrong_type() {
        assert!(serde_json::from_str::<CreateSessionRequest>(r#"{"presetMs": "5m"}"#).is_err());
    }

    #[test]
    fn test_create_session_response_urls() {
        let response = CreateSessionResponse::new("ABC234".to_string(), "deadbeef".to_string());
        assert_eq!(response.control_url, "/control?code=ABC234&token=deadbeef");
        assert_eq!(response.display_url, "/display?code=ABC234");

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["code"], "ABC234");
        assert_eq!(json["controllerToken"], "deadbeef");
        assert_eq!(json["controlUrl"], "/control?code=ABC234&token=deadbeef");
        assert_eq!(json["displayUrl"], "/display?code=ABC234");
    }

    #[test]
    fn test_health_response_serialization() {
        let json = serde_json::to_string(&HealthResponse { ok: true }).unwrap();
        assert_eq!(json, r#"{"ok":true}"#);
    }
}
