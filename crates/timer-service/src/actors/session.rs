//! `SessionActor` - per-session actor that owns timer state and membership.
//!
//! Each `SessionActor`:
//! - Owns the timer fields and the controller/display membership of one session
//! - Decides controller admission against the session's controller token
//! - Applies controller actions and broadcasts the resulting snapshot
//! - Notifies every member with `ended` when the session terminates
//!
//! All of a session's mutations go through its mailbox, so admission,
//! actions and membership changes observe one total order.

use crate::clock::Clock;
use crate::errors::TimerError;
use crate::ids::tokens_match;
use crate::observability::metrics as prom;
use crate::protocol::{Counts, Role, ServerMessage, StateSnapshot};
use crate::timer::{TimerAction, TimerState, Transition};

use super::connection::ConnectionHandle;
use super::messages::{ActionOutcome, EndReason, SessionInfo, SessionMessage};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 256;

/// Handle to a `SessionActor`.
///
/// A closed mailbox means the session is gone, so every method maps channel
/// failures to [`TimerError::SessionNotFound`].
#[derive(Clone, Debug)]
pub struct SessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    code: String,
}

impl SessionActorHandle {
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Ask to join this session.
    ///
    /// On success the connection has already been sent `joined` and `state`.
    pub async fn join(
        &self,
        connection: ConnectionHandle,
        role: Role,
        token: Option<String>,
    ) -> Result<Counts, TimerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Join {
                connection,
                role,
                token,
                respond_to: tx,
            })
            .await
            .map_err(|_| TimerError::SessionNotFound)?;

        rx.await.map_err(|_| TimerError::SessionNotFound)?
    }

    /// Notify the session that a connection left.
    pub async fn leave(&self, connection_id: String) -> Result<(), TimerError> {
        self.sender
            .send(SessionMessage::Leave { connection_id })
            .await
            .map_err(|_| TimerError::SessionNotFound)
    }

    /// Apply a timer action on behalf of a joined connection.
    pub async fn action(
        &self,
        connection_id: String,
        action: TimerAction,
    ) -> Result<ActionOutcome, TimerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Action {
                connection_id,
                action,
                respond_to: tx,
            })
            .await
            .map_err(|_| TimerError::SessionNotFound)?;

        rx.await.map_err(|_| TimerError::SessionNotFound)?
    }

    pub async fn get_state(&self) -> Result<SessionInfo, TimerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::GetState { respond_to: tx })
            .await
            .map_err(|_| TimerError::SessionNotFound)?;

        rx.await.map_err(|_| TimerError::SessionNotFound)
    }

    /// Terminate the session; members receive `ended` with `reason`'s message.
    pub async fn end(&self, reason: EndReason) -> Result<(), TimerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::End {
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|_| TimerError::SessionNotFound)?;

        rx.await.map_err(|_| TimerError::SessionNotFound)
    }

    /// Cancel the session actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    code: String,
    receiver: mpsc::Receiver<SessionMessage>,
    /// Cancellation token (child of the registry's token).
    cancel_token: CancellationToken,
    /// Secret minted at creation; never rotates.
    controller_token: SecretString,
    /// Token currently admitted as the controller identity.
    active_controller_token: Option<SecretString>,
    timer: TimerState,
    controllers: HashMap<String, ConnectionHandle>,
    displays: HashMap<String, ConnectionHandle>,
    created_at: i64,
    expires_at: i64,
    /// Set once `ended` has been sent; no further joins or actions.
    ended: bool,
    clock: Arc<dyn Clock>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

/// Everything needed to start a session.
pub struct SessionParams {
    pub code: String,
    pub controller_token: SecretString,
    pub preset_duration_ms: i64,
    pub allow_overtime: bool,
    pub created_at: i64,
    pub expires_at: i64,
}

impl SessionActor {
    /// Spawn a new session actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        params: SessionParams,
        cancel_token: CancellationToken,
        clock: Arc<dyn Clock>,
        metrics: Arc<ActorMetrics>,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);

        let actor = Self {
            code: params.code.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            controller_token: params.controller_token,
            active_controller_token: None,
            timer: TimerState::new(params.preset_duration_ms, params.allow_overtime),
            controllers: HashMap::new(),
            displays: HashMap::new(),
            created_at: params.created_at,
            expires_at: params.expires_at,
            ended: false,
            clock,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Session, &params.code),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            sender,
            cancel_token,
            code: params.code,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "timer.actor.session", fields(code = %self.code))]
    async fn run(mut self) {
        debug!(
            target: "timer.actor.session",
            code = %self.code,
            "SessionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.graceful_shutdown();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue(self.receiver.len());
                            self.handle_message(message);
                            self.metrics.record_message_processed();
                        }
                        None => {
                            debug!(
                                target: "timer.actor.session",
                                code = %self.code,
                                "SessionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            target: "timer.actor.session",
            code = %self.code,
            messages_processed = self.mailbox.messages_processed(),
            "SessionActor stopped"
        );
    }

    fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Join {
                connection,
                role,
                token,
                respond_to,
            } => {
                let result = self.handle_join(connection, role, token.as_deref());
                let _ = respond_to.send(result);
            }

            SessionMessage::Leave { connection_id } => {
                self.handle_leave(&connection_id);
            }

            SessionMessage::Action {
                connection_id,
                action,
                respond_to,
            } => {
                let result = self.handle_action(&connection_id, &action);
                let _ = respond_to.send(result);
            }

            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.info());
            }

            SessionMessage::End { reason, respond_to } => {
                self.end(reason);
                let _ = respond_to.send(());
            }
        }
    }

    /// Admission.
    ///
    /// Displays are always admitted. While a controller is connected, a
    /// controller join must present the active token (else conflict).
    /// Otherwise it must present the session's token and becomes active.
    fn handle_join(
        &mut self,
        connection: ConnectionHandle,
        role: Role,
        token: Option<&str>,
    ) -> Result<Counts, TimerError> {
        if self.ended {
            return Err(TimerError::SessionNotFound);
        }

        match role {
            Role::Display => {
                self.displays
                    .insert(connection.connection_id().to_string(), connection.clone());
            }
            Role::Controller => {
                let presented = token.unwrap_or_default();
                let slot_held = !self.controllers.is_empty();

                // While a controller is connected, only its identity may add
                // connections; anyone else is told the slot is taken.
                if let Some(active) = &self.active_controller_token {
                    if slot_held && !tokens_match(active.expose_secret(), presented) {
                        debug!(
                            target: "timer.actor.session",
                            code = %self.code,
                            connection_id = %connection.connection_id(),
                            "Controller join rejected: another controller is active"
                        );
                        return Err(TimerError::ControllerConflict);
                    }
                }

                if !tokens_match(self.controller_token.expose_secret(), presented) {
                    debug!(
                        target: "timer.actor.session",
                        code = %self.code,
                        connection_id = %connection.connection_id(),
                        "Controller join rejected: bad token"
                    );
                    return Err(TimerError::Unauthorized);
                }

                if !slot_held || self.active_controller_token.is_none() {
                    self.active_controller_token = Some(SecretString::from(presented));
                }

                self.controllers
                    .insert(connection.connection_id().to_string(), connection.clone());
            }
        }

        let counts = self.counts();
        self.metrics.connection_joined();

        info!(
            target: "timer.actor.session",
            code = %self.code,
            connection_id = %connection.connection_id(),
            role = role.as_str(),
            controllers = counts.controllers,
            displays = counts.displays,
            "Connection joined session"
        );

        connection.send(ServerMessage::Joined {
            role,
            code: self.code.clone(),
            counts,
        });
        connection.send(ServerMessage::State(self.snapshot()));
        self.broadcast(&ServerMessage::Presence { counts });

        Ok(counts)
    }

    fn handle_leave(&mut self, connection_id: &str) {
        let was_controller = self.controllers.remove(connection_id).is_some();
        let was_display = self.displays.remove(connection_id).is_some();

        if !was_controller && !was_display {
            return;
        }

        self.metrics.connection_left();

        if self.controllers.is_empty() {
            // Releases exclusivity so a controller can be admitted again.
            self.active_controller_token = None;
        }

        let counts = self.counts();
        debug!(
            target: "timer.actor.session",
            code = %self.code,
            connection_id = %connection_id,
            controllers = counts.controllers,
            displays = counts.displays,
            "Connection left session"
        );

        self.broadcast(&ServerMessage::Presence { counts });
    }

    fn handle_action(
        &mut self,
        connection_id: &str,
        action: &TimerAction,
    ) -> Result<ActionOutcome, TimerError> {
        if self.ended {
            return Err(TimerError::SessionNotFound);
        }

        if !self.controllers.contains_key(connection_id) {
            debug!(
                target: "timer.actor.session",
                code = %self.code,
                connection_id = %connection_id,
                action = action.name(),
                "Ignoring action from non-controller"
            );
            return Ok(ActionOutcome::Ignored);
        }

        let now = self.clock.now_ms();
        match self.timer.apply(action, now) {
            Transition::Changed => {
                debug!(
                    target: "timer.actor.session",
                    code = %self.code,
                    action = action.name(),
                    status = self.timer.status.as_str(),
                    "Timer action applied"
                );
                self.broadcast(&ServerMessage::State(self.snapshot_at(now)));
                Ok(ActionOutcome::Applied)
            }
            Transition::Unchanged => Ok(ActionOutcome::Unchanged),
            Transition::End => {
                self.end(EndReason::Ended);
                Ok(ActionOutcome::Ended)
            }
        }
    }

    /// Notify every member captured right now, then stop.
    fn end(&mut self, reason: EndReason) {
        if self.ended {
            return;
        }
        self.ended = true;

        info!(
            target: "timer.actor.session",
            code = %self.code,
            reason = reason.as_str(),
            controllers = self.controllers.len(),
            displays = self.displays.len(),
            "Ending session"
        );

        self.broadcast(&ServerMessage::Ended {
            code: self.code.clone(),
            message: reason.message().to_string(),
        });

        for _ in self.controllers.drain().chain(self.displays.drain()) {
            self.metrics.connection_left();
        }
        self.active_controller_token = None;

        prom::record_session_ended(reason.as_str());

        // The run loop exits on the next iteration.
        self.cancel_token.cancel();
    }

    fn graceful_shutdown(&mut self) {
        if !self.ended {
            self.end(EndReason::Shutdown);
        }
    }

    /// Best-effort fan-out to every member.
    fn broadcast(&self, message: &ServerMessage) {
        let mut failures = 0usize;
        for connection in self.controllers.values().chain(self.displays.values()) {
            if !connection.send(message.clone()) {
                failures += 1;
            }
        }

        if failures > 0 {
            warn!(
                target: "timer.actor.session",
                code = %self.code,
                kind = message.kind(),
                failures,
                "Broadcast partially failed"
            );
        }
    }

    fn counts(&self) -> Counts {
        Counts {
            controllers: self.controllers.len(),
            displays: self.displays.len(),
        }
    }

    fn snapshot(&self) -> StateSnapshot {
        self.snapshot_at(self.clock.now_ms())
    }

    fn snapshot_at(&self, now: i64) -> StateSnapshot {
        StateSnapshot::capture(&self.code, &self.timer, now)
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            snapshot: self.snapshot(),
            counts: self.counts(),
            controller_active: self.active_controller_token.is_some(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::timer::TimerStatus;
    use std::time::Duration;

    const T0: i64 = 1_700_000_000_000;
    const TOKEN: &str = "0123456789abcdef0123456789abcdef";

    fn spawn_session(clock: Arc<ManualClock>) -> (SessionActorHandle, JoinHandle<()>) {
        SessionActor::spawn(
            SessionParams {
                code: "ABC234".to_string(),
                controller_token: SecretString::from(TOKEN),
                preset_duration_ms: 300_000,
                allow_overtime: false,
                created_at: T0,
                expires_at: T0 + 7_200_000,
            },
            CancellationToken::new(),
            clock,
            ActorMetrics::new(),
        )
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_display_join_sends_joined_state_presence() {
        let clock = ManualClock::new(T0);
        let (session, _task) = spawn_session(clock);
        let (display, mut rx) = ConnectionHandle::new("d1");

        let counts = session.join(display, Role::Display, None).await.unwrap();
        assert_eq!(
            counts,
            Counts {
                controllers: 0,
                displays: 1
            }
        );

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 3);
        assert!(matches!(
            &messages[0],
            ServerMessage::Joined { role: Role::Display, code, counts: c } if code == "ABC234" && *c == counts
        ));
        match &messages[1] {
            ServerMessage::State(snapshot) => {
                assert_eq!(snapshot.status, TimerStatus::Idle);
                assert_eq!(snapshot.server_now, T0);
                assert_eq!(snapshot.preset_duration_ms, 300_000);
            }
            other => panic!("expected state, got {other:?}"),
        }
        assert_eq!(messages[2], ServerMessage::Presence { counts });
    }

    #[tokio::test]
    async fn test_controller_admission_rules() {
        let clock = ManualClock::new(T0);
        let (session, _task) = spawn_session(clock);

        let (bad, _bad_rx) = ConnectionHandle::new("bad");
        let result = session
            .join(bad, Role::Controller, Some("nope".to_string()))
            .await;
        assert_eq!(result, Err(TimerError::Unauthorized));

        let (missing, _missing_rx) = ConnectionHandle::new("missing");
        let result = session.join(missing, Role::Controller, None).await;
        assert_eq!(result, Err(TimerError::Unauthorized));

        let (a, _a_rx) = ConnectionHandle::new("a");
        session
            .join(a, Role::Controller, Some(TOKEN.to_string()))
            .await
            .unwrap();

        // A different token while A holds the slot is a conflict.
        let (rival, mut rival_rx) = ConnectionHandle::new("rival");
        let result = session
            .join(rival, Role::Controller, Some("nope".to_string()))
            .await;
        assert_eq!(result, Err(TimerError::ControllerConflict));
        assert!(drain(&mut rival_rx).is_empty());

        // Same token from a second connection is admitted alongside.
        let (b, _b_rx) = ConnectionHandle::new("b");
        let counts = session
            .join(b, Role::Controller, Some(TOKEN.to_string()))
            .await
            .unwrap();
        assert_eq!(counts.controllers, 2);

        let info = session.get_state().await.unwrap();
        assert!(info.controller_active);
    }

    #[tokio::test]
    async fn test_exclusivity_released_when_controllers_leave() {
        let clock = ManualClock::new(T0);
        let (session, _task) = spawn_session(clock);

        let (a, _a_rx) = ConnectionHandle::new("a");
        session
            .join(a, Role::Controller, Some(TOKEN.to_string()))
            .await
            .unwrap();

        session.leave("a".to_string()).await.unwrap();
        let info = session.get_state().await.unwrap();
        assert!(!info.controller_active);
        assert_eq!(info.counts.controllers, 0);

        let (c, _c_rx) = ConnectionHandle::new("c");
        let counts = session
            .join(c, Role::Controller, Some(TOKEN.to_string()))
            .await
            .unwrap();
        assert_eq!(counts.controllers, 1);
    }

    #[tokio::test]
    async fn test_leave_broadcasts_presence() {
        let clock = ManualClock::new(T0);
        let (session, _task) = spawn_session(clock);

        let (d1, mut d1_rx) = ConnectionHandle::new("d1");
        let (d2, _d2_rx) = ConnectionHandle::new("d2");
        session.join(d1, Role::Display, None).await.unwrap();
        session.join(d2, Role::Display, None).await.unwrap();
        drain(&mut d1_rx);

        session.leave("d2".to_string()).await.unwrap();
        session.get_state().await.unwrap();

        assert_eq!(
            drain(&mut d1_rx),
            vec![ServerMessage::Presence {
                counts: Counts {
                    controllers: 0,
                    displays: 1
                }
            }]
        );

        // Unknown connection: no broadcast.
        session.leave("ghost".to_string()).await.unwrap();
        session.get_state().await.unwrap();
        assert!(drain(&mut d1_rx).is_empty());
    }

    #[tokio::test]
    async fn test_action_broadcasts_snapshot_at_clock_instant() {
        let clock = ManualClock::new(T0);
        let (session, _task) = spawn_session(clock.clone());

        let (ctrl, mut ctrl_rx) = ConnectionHandle::new("ctrl");
        let (display, mut display_rx) = ConnectionHandle::new("d1");
        session
            .join(ctrl, Role::Controller, Some(TOKEN.to_string()))
            .await
            .unwrap();
        session.join(display, Role::Display, None).await.unwrap();
        drain(&mut ctrl_rx);
        drain(&mut display_rx);

        clock.advance(1_000);
        let outcome = session
            .action("ctrl".to_string(), TimerAction::Start)
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Applied);

        for rx in [&mut ctrl_rx, &mut display_rx] {
            match drain(rx).as_slice() {
                [ServerMessage::State(snapshot)] => {
                    assert_eq!(snapshot.status, TimerStatus::Running);
                    assert_eq!(snapshot.start_time, Some(T0 + 1_000));
                    assert_eq!(snapshot.server_now, T0 + 1_000);
                }
                other => panic!("expected one state message, got {other:?}"),
            }
        }

        // Resume while running is a no-op and broadcasts nothing.
        let outcome = session
            .action("ctrl".to_string(), TimerAction::Resume)
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Unchanged);
        assert!(drain(&mut display_rx).is_empty());
    }

    #[tokio::test]
    async fn test_display_actions_are_ignored() {
        let clock = ManualClock::new(T0);
        let (session, _task) = spawn_session(clock);

        let (display, mut rx) = ConnectionHandle::new("d1");
        session.join(display, Role::Display, None).await.unwrap();
        drain(&mut rx);

        let outcome = session
            .action("d1".to_string(), TimerAction::Start)
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Ignored);

        let outcome = session
            .action("d1".to_string(), TimerAction::End)
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Ignored);

        let info = session.get_state().await.unwrap();
        assert_eq!(info.snapshot.status, TimerStatus::Idle);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_end_notifies_all_members_and_stops() {
        let clock = ManualClock::new(T0);
        let (session, task) = spawn_session(clock);

        let (ctrl, mut ctrl_rx) = ConnectionHandle::new("ctrl");
        let (display, mut display_rx) = ConnectionHandle::new("d1");
        session
            .join(ctrl, Role::Controller, Some(TOKEN.to_string()))
            .await
            .unwrap();
        session.join(display, Role::Display, None).await.unwrap();
        drain(&mut ctrl_rx);
        drain(&mut display_rx);

        let outcome = session
            .action("ctrl".to_string(), TimerAction::End)
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Ended);

        let ended = ServerMessage::Ended {
            code: "ABC234".to_string(),
            message: "Session ended".to_string(),
        };
        assert_eq!(drain(&mut ctrl_rx), vec![ended.clone()]);
        assert_eq!(drain(&mut display_rx), vec![ended]);

        assert!(session.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        let (late, _late_rx) = ConnectionHandle::new("late");
        let result = session.join(late, Role::Display, None).await;
        assert_eq!(result, Err(TimerError::SessionNotFound));
    }

    #[tokio::test]
    async fn test_cancellation_sends_shutdown_notice() {
        let clock = ManualClock::new(T0);
        let (session, task) = spawn_session(clock);

        let (display, mut rx) = ConnectionHandle::new("d1");
        session.join(display, Role::Display, None).await.unwrap();
        drain(&mut rx);

        session.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::Ended {
                code: "ABC234".to_string(),
                message: "Server shutting down".to_string(),
            }]
        );
    }
}
