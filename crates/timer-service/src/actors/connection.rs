//! Per-connection protocol state.
//!
//! - [`ConnectionHandle`] is the outbound mailbox of one transport connection.
//!   Session actors hold one per member and push [`ServerMessage`]s into it.
//! - [`ClientConnection`] interprets inbound frames for one connection:
//!   joins, actions, and membership cleanup on close. It knows nothing about
//!   the transport; the WebSocket handler feeds it text frames and drains
//!   the outbound receiver.
//!
//! # Lifecycle
//!
//! 1. Created un-joined when the transport connects
//! 2. `join` attaches it to at most one session at a time
//! 3. [`ClientConnection::close`] leaves the session, if any

use crate::errors::TimerError;
use crate::observability::metrics as prom;
use crate::protocol::{normalize_code, parse_client_message, ClientMessage, Role, ServerMessage};
use crate::timer::TimerAction;

use super::messages::ActionOutcome;
use super::registry::SessionRegistryActorHandle;
use super::session::SessionActorHandle;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Outbound buffer per connection. A full buffer drops messages for that
/// connection only.
pub const CONNECTION_CHANNEL_BUFFER: usize = 64;

/// Outbound mailbox of one connection.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    connection_id: String,
    sender: mpsc::Sender<ServerMessage>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver the transport writer drains.
    #[must_use]
    pub fn new(connection_id: impl Into<String>) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        (
            Self {
                connection_id: connection_id.into(),
                sender,
            },
            receiver,
        )
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Best-effort send. Never blocks and never propagates failure; returns
    /// whether the message was queued.
    pub fn send(&self, message: ServerMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!(
                    target: "timer.connection",
                    connection_id = %self.connection_id,
                    kind = message.kind(),
                    "Outbound buffer full, dropping message"
                );
                prom::record_send_failure();
                false
            }
            Err(TrySendError::Closed(message)) => {
                debug!(
                    target: "timer.connection",
                    connection_id = %self.connection_id,
                    kind = message.kind(),
                    "Connection closed, dropping message"
                );
                prom::record_send_failure();
                false
            }
        }
    }
}

#[derive(Debug)]
struct JoinedSession {
    code: String,
    role: Role,
    session: SessionActorHandle,
}

/// Protocol state machine for one connection.
#[derive(Debug)]
pub struct ClientConnection {
    outbound: ConnectionHandle,
    registry: SessionRegistryActorHandle,
    joined: Option<JoinedSession>,
}

impl ClientConnection {
    /// Create an un-joined connection with a fresh id.
    ///
    /// Returns the connection and the receiver of its outbound messages.
    #[must_use]
    pub fn new(registry: SessionRegistryActorHandle) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (outbound, receiver) = ConnectionHandle::new(uuid::Uuid::new_v4().to_string());
        (
            Self {
                outbound,
                registry,
                joined: None,
            },
            receiver,
        )
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        self.outbound.connection_id()
    }

    /// Code of the joined session, if any.
    #[must_use]
    pub fn joined_code(&self) -> Option<&str> {
        self.joined.as_ref().map(|j| j.code.as_str())
    }

    #[must_use]
    pub fn joined_role(&self) -> Option<Role> {
        self.joined.as_ref().map(|j| j.role)
    }

    /// Handle one inbound text frame.
    pub async fn handle_text(&mut self, text: &str) {
        let message = match parse_client_message(text) {
            Ok(message) => message,
            Err(_) => {
                debug!(
                    target: "timer.connection",
                    connection_id = %self.connection_id(),
                    len = text.len(),
                    "Dropping malformed frame"
                );
                return;
            }
        };

        match message {
            ClientMessage::Join { role, code, token } => {
                self.handle_join(role, &code, token).await;
            }
            ClientMessage::Action { action, payload } => {
                self.handle_action(action.as_deref(), payload.as_ref()).await;
            }
        }
    }

    async fn handle_join(&mut self, role: Role, code: &str, token: Option<String>) {
        // One session per connection; joining again leaves the previous one.
        self.leave_current().await;

        let code = normalize_code(code);
        let result = match self.registry.get_session(code.clone()).await {
            Ok(session) => session
                .join(self.outbound.clone(), role, token)
                .await
                .map(|_| session),
            Err(e) => Err(e),
        };

        match result {
            Ok(session) => {
                prom::record_join(role.as_str(), "admitted");
                self.joined = Some(JoinedSession {
                    code,
                    role,
                    session,
                });
            }
            Err(e) => {
                prom::record_join(role.as_str(), join_outcome(&e));
                debug!(
                    target: "timer.connection",
                    connection_id = %self.connection_id(),
                    role = role.as_str(),
                    error = %e,
                    "Join rejected"
                );
                self.outbound.send(ServerMessage::error(&e));
            }
        }
    }

    async fn handle_action(&mut self, name: Option<&str>, payload: Option<&Value>) {
        let Some(joined) = &self.joined else {
            debug!(
                target: "timer.connection",
                connection_id = %self.connection_id(),
                "Dropping action before join"
            );
            return;
        };

        let Some(action) = name.and_then(|n| TimerAction::from_wire(n, payload)) else {
            debug!(
                target: "timer.connection",
                connection_id = %self.connection_id(),
                action = ?name,
                "Ignoring unrecognized action"
            );
            return;
        };

        let action_name = action.name();
        let code = joined.code.clone();
        let result = joined
            .session
            .action(self.outbound.connection_id().to_string(), action)
            .await;

        match result {
            Ok(ActionOutcome::Ended) => {
                prom::record_action(action_name, ActionOutcome::Ended.as_str());
                self.joined = None;
                if let Err(e) = self.registry.remove_session(code).await {
                    debug!(
                        target: "timer.connection",
                        connection_id = %self.connection_id(),
                        error = %e,
                        "Ended session already removed"
                    );
                }
            }
            Ok(outcome) => {
                prom::record_action(action_name, outcome.as_str());
            }
            Err(TimerError::SessionNotFound) => {
                // The session ended underneath us.
                self.joined = None;
            }
            Err(e) => {
                warn!(
                    target: "timer.connection",
                    connection_id = %self.connection_id(),
                    error = %e,
                    "Action failed"
                );
            }
        }
    }

    async fn leave_current(&mut self) {
        if let Some(previous) = self.joined.take() {
            let _ = previous
                .session
                .leave(self.outbound.connection_id().to_string())
                .await;
        }
    }

    /// Transport closed: release membership.
    pub async fn close(mut self) {
        self.leave_current().await;
    }
}

fn join_outcome(error: &TimerError) -> &'static str {
    match error {
        TimerError::SessionNotFound => "not_found",
        TimerError::Unauthorized => "unauthorized",
        TimerError::ControllerConflict => "conflict",
        _ => "error",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::Counts;

    #[test]
    fn test_send_reports_closed_receiver() {
        let (handle, rx) = ConnectionHandle::new("c1");
        assert!(handle.send(ServerMessage::Error {
            message: "x".to_string()
        }));
        drop(rx);
        assert!(!handle.send(ServerMessage::Error {
            message: "y".to_string()
        }));
    }

    #[test]
    fn test_send_drops_when_full() {
        let (handle, mut rx) = ConnectionHandle::new("c1");
        let presence = ServerMessage::Presence {
            counts: Counts::default(),
        };
        for _ in 0..CONNECTION_CHANNEL_BUFFER {
            assert!(handle.send(presence.clone()));
        }
        assert!(!handle.send(presence.clone()));

        // Draining one slot makes room again.
        assert!(rx.try_recv().is_ok());
        assert!(handle.send(presence));
    }

    #[test]
    fn test_join_outcome_labels() {
        assert_eq!(join_outcome(&TimerError::SessionNotFound), "not_found");
        assert_eq!(join_outcome(&TimerError::Unauthorized), "unauthorized");
        assert_eq!(join_outcome(&TimerError::ControllerConflict), "conflict");
        assert_eq!(join_outcome(&TimerError::Internal("x".into())), "error");
    }
}
