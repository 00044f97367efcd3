//! Authoritative countdown timer semantics.
//!
//! A [`TimerState`] holds only the fields needed to derive remaining time;
//! remaining time itself is never stored:
//!
//! ```text
//! elapsed   = now - startTime - pauseAccumulatedMs - (paused ? now - lastPausedAt : 0)
//! remaining = presetDurationMs - elapsed
//! ```
//!
//! While paused, elapsed is frozen at its value at the moment of pausing.
//! Actions are applied against an explicit `now` so the caller (the session
//! actor) decides which clock reading an action is serialized at.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-tracked timer status.
///
/// `completed` and `overtime` are derived display states, see [`DisplayStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    Idle,
    Running,
    Paused,
}

impl TimerStatus {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TimerStatus::Idle => "idle",
            TimerStatus::Running => "running",
            TimerStatus::Paused => "paused",
        }
    }
}

/// What a viewer should render, derived from remaining time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayStatus {
    Idle,
    Running,
    Paused,
    /// Ran out and overtime is not allowed.
    Completed,
    /// Ran out and counting past zero is allowed.
    Overtime,
}

/// A controller action, decoded from the wire `action` name and payload.
///
/// Payload fields that are missing or of the wrong type decode to `None`,
/// which makes the action a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerAction {
    Start,
    Pause,
    Resume,
    /// Back to idle; optionally replaces the preset (`payload.presetMs`).
    Reset { preset_ms: Option<i64> },
    /// Signed change to the preset (`payload.deltaMs`).
    Adjust { delta_ms: Option<i64> },
    /// New preset (`payload.ms`).
    SetDuration { ms: Option<i64> },
    /// Overtime flag (`payload.value`).
    SetOvertime { value: Option<bool> },
    /// Terminate the session.
    End,
}

impl TimerAction {
    /// Decode an action name and optional payload.
    ///
    /// Returns `None` for unrecognized action names.
    #[must_use]
    pub fn from_wire(name: &str, payload: Option<&Value>) -> Option<Self> {
        let field = |key: &str| payload.and_then(|p| p.get(key));

        let action = match name {
            "start" => TimerAction::Start,
            "pause" => TimerAction::Pause,
            "resume" => TimerAction::Resume,
            "reset" => TimerAction::Reset {
                preset_ms: field("presetMs").and_then(json_millis),
            },
            "adjust" => TimerAction::Adjust {
                delta_ms: field("deltaMs").and_then(json_millis),
            },
            "setDuration" => TimerAction::SetDuration {
                ms: field("ms").and_then(json_millis),
            },
            "setOvertime" => TimerAction::SetOvertime {
                value: field("value").and_then(Value::as_bool),
            },
            "end" => TimerAction::End,
            _ => return None,
        };

        Some(action)
    }

    /// Wire name, used as a metrics label.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            TimerAction::Start => "start",
            TimerAction::Pause => "pause",
            TimerAction::Resume => "resume",
            TimerAction::Reset { .. } => "reset",
            TimerAction::Adjust { .. } => "adjust",
            TimerAction::SetDuration { .. } => "setDuration",
            TimerAction::SetOvertime { .. } => "setOvertime",
            TimerAction::End => "end",
        }
    }
}

/// Read a JSON number as whole milliseconds. Fractions are truncated.
fn json_millis(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite())
            .map(|f| f.trunc() as i64)
    })
}

/// Result of applying an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// At least one field changed; a new snapshot must be published.
    Changed,
    /// Precondition unmet or nothing to change; silent no-op.
    Unchanged,
    /// The session must be terminated.
    End,
}

/// Timing fields of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerState {
    pub status: TimerStatus,
    pub preset_duration_ms: i64,
    /// Epoch ms of the most recent `start`; `None` while idle.
    pub start_time: Option<i64>,
    /// Total ms spent paused since the last `start`.
    pub pause_accumulated_ms: i64,
    /// Epoch ms of the current pause; `None` unless paused.
    pub last_paused_at: Option<i64>,
    pub allow_overtime: bool,
}

impl TimerState {
    /// Fresh idle timer. Negative presets are clamped to zero.
    #[must_use]
    pub fn new(preset_duration_ms: i64, allow_overtime: bool) -> Self {
        Self {
            status: TimerStatus::Idle,
            preset_duration_ms: preset_duration_ms.max(0),
            start_time: None,
            pause_accumulated_ms: 0,
            last_paused_at: None,
            allow_overtime,
        }
    }

    /// Apply `action` at instant `now`.
    pub fn apply(&mut self, action: &TimerAction, now: i64) -> Transition {
        let before = self.clone();

        match action {
            TimerAction::Start => {
                self.status = TimerStatus::Running;
                self.start_time = Some(now);
                self.pause_accumulated_ms = 0;
                self.last_paused_at = None;
            }
            TimerAction::Pause => {
                if self.status == TimerStatus::Running {
                    self.status = TimerStatus::Paused;
                    self.last_paused_at = Some(now);
                }
            }
            TimerAction::Resume => {
                if let (TimerStatus::Paused, Some(paused_at)) = (self.status, self.last_paused_at)
                {
                    self.status = TimerStatus::Running;
                    // A clock step backwards must never shrink the accumulation.
                    self.pause_accumulated_ms += now.saturating_sub(paused_at).max(0);
                    self.last_paused_at = None;
                }
            }
            TimerAction::Reset { preset_ms } => {
                self.status = TimerStatus::Idle;
                self.start_time = None;
                self.pause_accumulated_ms = 0;
                self.last_paused_at = None;
                if let Some(preset) = preset_ms.filter(|p| *p >= 0) {
                    self.preset_duration_ms = preset;
                }
            }
            TimerAction::Adjust { delta_ms } => {
                if let Some(delta) = delta_ms {
                    self.preset_duration_ms = self.preset_duration_ms.saturating_add(*delta).max(0);
                }
            }
            TimerAction::SetDuration { ms } => {
                if let Some(ms) = ms {
                    self.preset_duration_ms = (*ms).max(0);
                }
            }
            TimerAction::SetOvertime { value } => {
                if let Some(value) = value {
                    self.allow_overtime = *value;
                }
            }
            TimerAction::End => return Transition::End,
        }

        if *self == before {
            Transition::Unchanged
        } else {
            Transition::Changed
        }
    }

    /// Milliseconds of countdown consumed at `now`.
    #[must_use]
    pub fn elapsed_ms(&self, now: i64) -> i64 {
        let Some(start) = self.start_time else {
            return 0;
        };

        let current_pause = match (self.status, self.last_paused_at) {
            (TimerStatus::Paused, Some(paused_at)) => now - paused_at,
            _ => 0,
        };

        now - start - self.pause_accumulated_ms - current_pause
    }

    /// Milliseconds left at `now`; negative once past zero.
    #[must_use]
    pub fn remaining_ms(&self, now: i64) -> i64 {
        self.preset_duration_ms - self.elapsed_ms(now)
    }

    /// Display state at `now`.
    #[must_use]
    pub fn display_status(&self, now: i64) -> DisplayStatus {
        match self.status {
            TimerStatus::Idle => DisplayStatus::Idle,
            TimerStatus::Paused => DisplayStatus::Paused,
            TimerStatus::Running if self.remaining_ms(now) > 0 => DisplayStatus::Running,
            TimerStatus::Running if self.allow_overtime => DisplayStatus::Overtime,
            TimerStatus::Running => DisplayStatus::Completed,
        }
    }
}

/// Render milliseconds as `MM:SS`, prefixed with `-` when negative.
#[must_use]
pub fn format_duration(ms: i64) -> String {
    let sign = if ms < 0 { "-" } else { "" };
    let abs = ms.unsigned_abs();
    let minutes = abs / 60_000;
    let seconds = (abs % 60_000) / 1000;
    format!("{sign}{minutes:02}:{seconds:02}")
}
