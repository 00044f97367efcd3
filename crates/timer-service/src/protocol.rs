//! Real-time wire protocol.
//!
//! Every frame is a JSON object tagged by `type`.
//!
//! Client to server: `join`, `action`.
//! Server to client: `joined`, `state`, `presence`, `error`, `ended`.
//!
//! Frames that are not JSON objects, or carry an unknown `type`, are
//! malformed and dropped without a reply.

use crate::errors::TimerError;
use crate::timer::{TimerState, TimerStatus};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Role a connection joins a session as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Controller,
    #[default]
    Display,
}

impl Role {
    /// Lowercase wire name, also used as a metrics label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Controller => "controller",
            Role::Display => "display",
        }
    }
}

/// Membership counts of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub controllers: usize,
    pub displays: usize,
}

/// Inbound message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Join {
        /// Anything other than `"controller"` joins read-only.
        #[serde(default, deserialize_with = "lenient_role")]
        role: Role,
        /// Session code as typed by the user; normalized with [`normalize_code`].
        #[serde(default, deserialize_with = "lenient_code")]
        code: String,
        /// Only strings can ever match a controller token.
        #[serde(default, deserialize_with = "string_or_none")]
        token: Option<String>,
    },
    Action {
        /// Unrecognized or non-string names are ignored downstream.
        #[serde(default, deserialize_with = "string_or_none")]
        action: Option<String>,
        #[serde(default)]
        payload: Option<Value>,
    },
}

fn lenient_role<'de, D>(deserializer: D) -> Result<Role, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if s == "controller" => Role::Controller,
        _ => Role::Display,
    })
}

/// Accept a string or a number for the join code; anything else is empty.
fn lenient_code<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

/// Parse one inbound text frame.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, TimerError> {
    serde_json::from_str(text).map_err(|_| TimerError::MalformedMessage)
}

/// Session codes are matched case-insensitively.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Authoritative, timestamped description of a session's timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub code: String,
    pub status: TimerStatus,
    pub preset_duration_ms: i64,
    pub start_time: Option<i64>,
    pub pause_accumulated_ms: i64,
    pub last_paused_at: Option<i64>,
    pub allow_overtime: bool,
    /// Server clock reading when the snapshot was produced.
    pub server_now: i64,
}

impl StateSnapshot {
    /// Capture `state` as of `server_now`.
    #[must_use]
    pub fn capture(code: &str, state: &TimerState, server_now: i64) -> Self {
        Self {
            code: code.to_string(),
            status: state.status,
            preset_duration_ms: state.preset_duration_ms,
            start_time: state.start_time,
            pause_accumulated_ms: state.pause_accumulated_ms,
            last_paused_at: state.last_paused_at,
            allow_overtime: state.allow_overtime,
            server_now,
        }
    }

    /// Remaining milliseconds at server time `server_now`.
    ///
    /// While paused without `lastPausedAt`, the snapshot's own `serverNow`
    /// stands in for the pause instant.
    #[must_use]
    pub fn remaining_ms_at(&self, server_now: i64) -> i64 {
        let Some(start) = self.start_time else {
            return self.preset_duration_ms;
        };

        let elapsed = match self.status {
            TimerStatus::Paused => {
                let paused_at = self.last_paused_at.unwrap_or(self.server_now);
                paused_at - start - self.pause_accumulated_ms
            }
            _ => server_now - start - self.pause_accumulated_ms,
        };

        self.preset_duration_ms - elapsed
    }
}

/// Difference between the server clock and a client's local clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockOffset {
    offset_ms: i64,
}

impl ClockOffset {
    /// Measure from a snapshot's `serverNow` and the local clock at receipt.
    #[must_use]
    pub const fn measure(server_now: i64, local_now: i64) -> Self {
        Self {
            offset_ms: server_now - local_now,
        }
    }

    #[must_use]
    pub const fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    /// Translate a local clock reading to server time.
    #[must_use]
    pub const fn server_time(&self, local_now: i64) -> i64 {
        local_now + self.offset_ms
    }
}

/// Outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Join acknowledgment, sent only to the joining connection.
    Joined {
        role: Role,
        code: String,
        counts: Counts,
    },
    State(StateSnapshot),
    Presence {
        counts: Counts,
    },
    Error {
        message: String,
    },
    /// Terminal notice; the session no longer exists.
    Ended {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    /// Error reply for a rejected request.
    #[must_use]
    pub fn error(error: &TimerError) -> Self {
        ServerMessage::Error {
            message: error.client_message(),
        }
    }

    /// Wire `type`, used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::State(_) => "state",
            ServerMessage::Presence { .. } => "presence",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Ended { .. } => "ended",
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_text(&self) -> Result<String, TimerError> {
        serde_json::to_string(self)
            .map_err(|e| TimerError::Internal(format!("failed to encode {}: {e}", self.kind())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::timer::TimerAction;
    use serde_json::json;

    #[test]
    fn test_parse_join() {
        let msg =
            parse_client_message(r#"{"type":"join","role":"controller","code":"ab2cd3","token":"t"}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                role: Role::Controller,
                code: "ab2cd3".to_string(),
                token: Some("t".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_join_lenient_fields() {
        let msg = parse_client_message(r#"{"type":"join","role":"display"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                role: Role::Display,
                code: String::new(),
                token: None,
            }
        );

        let msg =
            parse_client_message(r#"{"type":"join","role":"display","code":234567,"token":42}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                role: Role::Display,
                code: "234567".to_string(),
                token: None,
            }
        );
    }

    #[test]
    fn test_parse_action() {
        let msg = parse_client_message(
            r#"{"type":"action","action":"adjust","payload":{"deltaMs":60000}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Action {
                action: Some("adjust".to_string()),
                payload: Some(json!({"deltaMs": 60000})),
            }
        );

        let msg = parse_client_message(r#"{"type":"action","action":7}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Action {
                action: None,
                payload: None,
            }
        );
    }

    #[test]
    fn test_parse_join_unknown_role_is_display() {
        for text in [
            r#"{"type":"join","role":"admin","code":"ABC"}"#,
            r#"{"type":"join","role":"Controller","code":"ABC"}"#,
            r#"{"type":"join","role":7,"code":"ABC"}"#,
            r#"{"type":"join","code":"ABC"}"#,
        ] {
            assert_eq!(
                parse_client_message(text).unwrap(),
                ClientMessage::Join {
                    role: Role::Display,
                    code: "ABC".to_string(),
                    token: None,
                },
                "expected display join: {text}"
            );
        }
    }

    #[test]
    fn test_parse_malformed() {
        for text in [
            "not json",
            "[]",
            "42",
            "null",
            r#""join""#,
            r#"{"role":"display","code":"ABC"}"#,
            r#"{"type":"subscribe"}"#,
        ] {
            assert_eq!(
                parse_client_message(text),
                Err(TimerError::MalformedMessage),
                "expected malformed: {text}"
            );
        }
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("ab2cd3"), "AB2CD3");
        assert_eq!(normalize_code(" XY9Z "), "XY9Z");
        assert_eq!(normalize_code(""), "");
    }

    #[test]
    fn test_server_message_wire_shapes() {
        let joined = ServerMessage::Joined {
            role: Role::Display,
            code: "ABC234".to_string(),
            counts: Counts {
                controllers: 1,
                displays: 2,
            },
        };
        assert_eq!(
            serde_json::to_value(&joined).unwrap(),
            json!({"type":"joined","role":"display","code":"ABC234","counts":{"controllers":1,"displays":2}})
        );

        let presence = ServerMessage::Presence {
            counts: Counts::default(),
        };
        assert_eq!(
            serde_json::to_value(&presence).unwrap(),
            json!({"type":"presence","counts":{"controllers":0,"displays":0}})
        );

        let error = ServerMessage::error(&TimerError::Unauthorized);
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"type":"error","message":"Unauthorized"})
        );

        let ended = ServerMessage::Ended {
            code: "ABC234".to_string(),
            message: "Session ended".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&ended).unwrap(),
            json!({"type":"ended","code":"ABC234","message":"Session ended"})
        );
    }

    #[test]
    fn test_state_snapshot_wire_shape() {
        let mut state = TimerState::new(300_000, true);
        state.apply(&TimerAction::Start, 1_000);
        let snapshot = StateSnapshot::capture("ABC234", &state, 1_500);

        let text = ServerMessage::State(snapshot.clone()).to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "state",
                "code": "ABC234",
                "status": "running",
                "presetDurationMs": 300000,
                "startTime": 1000,
                "pauseAccumulatedMs": 0,
                "lastPausedAt": null,
                "allowOvertime": true,
                "serverNow": 1500
            })
        );

        let decoded: ServerMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, ServerMessage::State(snapshot));
    }

    #[test]
    fn test_snapshot_remaining_matches_server_state() {
        let t0 = 1_700_000_000_000;
        let mut state = TimerState::new(300_000, false);
        state.apply(&TimerAction::Start, t0);
        state.apply(&TimerAction::Pause, t0 + 5_000);
        state.apply(&TimerAction::Resume, t0 + 8_000);

        let snapshot = StateSnapshot::capture("C", &state, t0 + 8_000);
        assert_eq!(
            snapshot.remaining_ms_at(t0 + 10_000),
            state.remaining_ms(t0 + 10_000)
        );

        state.apply(&TimerAction::Pause, t0 + 12_000);
        let paused = StateSnapshot::capture("C", &state, t0 + 12_000);
        assert_eq!(paused.remaining_ms_at(t0 + 60_000), 300_000 - 9_000);

        let idle = StateSnapshot::capture("C", &TimerState::new(42_000, false), t0);
        assert_eq!(idle.remaining_ms_at(t0 + 99_999), 42_000);
    }

    #[test]
    fn test_clock_offset_aligns_clients() {
        let server_now = 1_700_000_010_000;

        // One client's clock runs 4s behind, another 2.5s ahead.
        let slow = ClockOffset::measure(server_now, server_now - 4_000);
        let fast = ClockOffset::measure(server_now, server_now + 2_500);
        assert_eq!(slow.offset_ms(), 4_000);
        assert_eq!(fast.offset_ms(), -2_500);

        // 1s of local time later both map to the same server instant.
        assert_eq!(slow.server_time(server_now - 3_000), server_now + 1_000);
        assert_eq!(fast.server_time(server_now + 3_500), server_now + 1_000);
    }
}
