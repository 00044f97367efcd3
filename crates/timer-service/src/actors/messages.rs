//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use crate::errors::TimerError;
use crate::protocol::{Counts, Role, StateSnapshot};
use crate::timer::TimerAction;

use super::connection::ConnectionHandle;
use super::session::SessionActorHandle;

use secrecy::SecretString;
use tokio::sync::oneshot;

/// Messages sent to `SessionRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Allocate a new session and spawn its actor.
    CreateSession {
        preset_duration_ms: i64,
        allow_overtime: bool,
        respond_to: oneshot::Sender<Result<SessionCreated, TimerError>>,
    },

    /// Look up a live session by (normalized) code.
    GetSession {
        code: String,
        respond_to: oneshot::Sender<Result<SessionActorHandle, TimerError>>,
    },

    /// Drop a session from the registry and stop its actor.
    RemoveSession {
        code: String,
        respond_to: oneshot::Sender<Result<(), TimerError>>,
    },

    /// Get registry status (for health and tests).
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop accepting new sessions; existing sessions keep running.
    BeginDrain {
        respond_to: oneshot::Sender<()>,
    },

    /// Stop accepting new sessions and tear down every session.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), TimerError>>,
    },
}

/// Messages sent to `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// A connection asks to join as `role`.
    ///
    /// On success the actor itself sends `joined` and `state` to the
    /// connection, then broadcasts `presence`.
    Join {
        connection: ConnectionHandle,
        role: Role,
        token: Option<String>,
        respond_to: oneshot::Sender<Result<Counts, TimerError>>,
    },

    /// A connection left (closed, or joined elsewhere).
    Leave { connection_id: String },

    /// A timer action from a joined connection.
    Action {
        connection_id: String,
        action: TimerAction,
        respond_to: oneshot::Sender<Result<ActionOutcome, TimerError>>,
    },

    /// Snapshot of the session for diagnostics and tests.
    GetState {
        respond_to: oneshot::Sender<SessionInfo>,
    },

    /// Terminate the session, notifying every member.
    End {
        reason: EndReason,
        respond_to: oneshot::Sender<()>,
    },
}

/// Returned to the HTTP layer after creating a session.
#[derive(Debug)]
pub struct SessionCreated {
    pub code: String,
    pub controller_token: SecretString,
    pub expires_at: i64,
}

/// Registry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    pub session_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
    /// Messages queued behind this status request.
    pub mailbox_depth: usize,
    pub mailbox_peak_depth: usize,
}

/// What happened to an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// State changed and a snapshot was broadcast.
    Applied,
    /// Precondition unmet or no-op payload; nothing broadcast.
    Unchanged,
    /// Sender is not a controller of this session.
    Ignored,
    /// The session was terminated by this action.
    Ended,
}

impl ActionOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActionOutcome::Applied => "applied",
            ActionOutcome::Unchanged => "unchanged",
            ActionOutcome::Ignored => "ignored",
            ActionOutcome::Ended => "ended",
        }
    }
}

/// Why a session was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// A controller sent `end`.
    Ended,
    /// TTL elapsed and eviction is enabled.
    Expired,
    /// The server is shutting down.
    Shutdown,
}

impl EndReason {
    /// Metrics label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EndReason::Ended => "ended",
            EndReason::Expired => "expired",
            EndReason::Shutdown => "shutdown",
        }
    }

    /// Text carried by the `ended` message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            EndReason::Ended => "Session ended",
            EndReason::Expired => "Session expired",
            EndReason::Shutdown => "Server shutting down",
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub snapshot: StateSnapshot,
    pub counts: Counts,
    /// Whether a controller token is currently admitted.
    pub controller_active: bool,
    pub created_at: i64,
    pub expires_at: i64,
}
