//! `SessionRegistryActor` - singleton owner of the code -> session map.
//!
//! The `SessionRegistryActor` is the top-level actor:
//!
//! - Singleton per process, created at startup and injected into handlers
//! - Allocates session codes and controller tokens, spawns `SessionActor`s
//! - Owns the root `CancellationToken`; each session runs on a child token
//! - Monitors child actor health (panic detection via `JoinHandle`)
//! - Optionally evicts sessions past their `expiresAt`
//!
//! # Graceful Shutdown
//!
//! 1. `begin_drain` stops session creation (HTTP answers 503)
//! 2. `shutdown` cancels the root token; every session sends `ended`
//!    and every WebSocket task observing a child token closes

use crate::clock::Clock;
use crate::config::Config;
use crate::errors::TimerError;
use crate::ids::{generate_controller_token, generate_session_code, CodeAlphabet};

use super::messages::{EndReason, RegistryMessage, RegistryStatus, SessionCreated};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::session::{SessionActor, SessionActorHandle, SessionParams};

use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// How long shutdown waits for each session task.
const SESSION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry settings derived from [`Config`].
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub code_alphabet: CodeAlphabet,
    pub code_length: usize,
    pub session_ttl: Duration,
    pub eviction_enabled: bool,
    pub sweep_interval: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            code_alphabet: CodeAlphabet::default(),
            code_length: crate::ids::DEFAULT_CODE_LENGTH,
            session_ttl: Duration::from_secs(120 * 60),
            eviction_enabled: false,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl From<&Config> for RegistrySettings {
    fn from(config: &Config) -> Self {
        Self {
            code_alphabet: config.code_alphabet.clone(),
            code_length: config.code_length,
            session_ttl: config.session_ttl,
            eviction_enabled: config.eviction_enabled,
            sweep_interval: config.sweep_interval,
        }
    }
}

/// Handle to the `SessionRegistryActor`.
///
/// This is the public interface used by HTTP and WebSocket handlers.
#[derive(Clone, Debug)]
pub struct SessionRegistryActorHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl SessionRegistryActorHandle {
    /// Spawn the registry actor and return a handle to it.
    #[must_use]
    pub fn new(
        settings: RegistrySettings,
        clock: Arc<dyn Clock>,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SessionRegistryActor {
            receiver,
            cancel_token: cancel_token.clone(),
            sessions: HashMap::new(),
            accepting_new: true,
            settings,
            clock,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Registry, "registry"),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Create a new session.
    pub async fn create_session(
        &self,
        preset_duration_ms: i64,
        allow_overtime: bool,
    ) -> Result<SessionCreated, TimerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::CreateSession {
                preset_duration_ms,
                allow_overtime,
                respond_to: tx,
            })
            .await
            .map_err(|e| TimerError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| TimerError::Internal(format!("response receive failed: {e}")))?
    }

    /// Look up a live session by its normalized code.
    pub async fn get_session(&self, code: String) -> Result<SessionActorHandle, TimerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetSession {
                code,
                respond_to: tx,
            })
            .await
            .map_err(|e| TimerError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| TimerError::Internal(format!("response receive failed: {e}")))?
    }

    /// Remove a session; subsequent lookups fail with `SessionNotFound`.
    pub async fn remove_session(&self, code: String) -> Result<(), TimerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::RemoveSession {
                code,
                respond_to: tx,
            })
            .await
            .map_err(|e| TimerError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| TimerError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn get_status(&self) -> Result<RegistryStatus, TimerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| TimerError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| TimerError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop accepting new sessions.
    pub async fn begin_drain(&self) -> Result<(), TimerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::BeginDrain { respond_to: tx })
            .await
            .map_err(|e| TimerError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| TimerError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate shutdown of every session.
    pub async fn shutdown(&self) -> Result<(), TimerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| TimerError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| TimerError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Child token for tasks that must stop when the registry shuts down.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed session.
struct ManagedSession {
    handle: SessionActorHandle,
    task_handle: JoinHandle<()>,
    created_at: i64,
    expires_at: i64,
}

/// The `SessionRegistryActor` implementation.
pub struct SessionRegistryActor {
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    /// Live sessions by code.
    sessions: HashMap<String, ManagedSession>,
    accepting_new: bool,
    settings: RegistrySettings,
    clock: Arc<dyn Clock>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl SessionRegistryActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "timer.actor.registry")]
    async fn run(mut self) {
        info!(
            target: "timer.actor.registry",
            eviction_enabled = self.settings.eviction_enabled,
            ttl_secs = self.settings.session_ttl.as_secs(),
            "SessionRegistryActor started"
        );

        let mut sweep = tokio::time::interval(self.settings.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.check_session_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "timer.actor.registry",
                        "SessionRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                _ = sweep.tick(), if self.settings.eviction_enabled => {
                    self.evict_expired().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue(self.receiver.len());
                            self.handle_message(message).await;
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "timer.actor.registry",
                                "SessionRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "timer.actor.registry",
            sessions_remaining = self.sessions.len(),
            messages_processed = self.mailbox.messages_processed(),
            "SessionRegistryActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::CreateSession {
                preset_duration_ms,
                allow_overtime,
                respond_to,
            } => {
                let result = self.create_session(preset_duration_ms, allow_overtime);
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetSession { code, respond_to } => {
                let result = self.get_session(&code);
                let _ = respond_to.send(result);
            }

            RegistryMessage::RemoveSession { code, respond_to } => {
                let result = self.remove_session(&code);
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::BeginDrain { respond_to } => {
                if self.accepting_new {
                    info!(
                        target: "timer.actor.registry",
                        sessions = self.sessions.len(),
                        "Draining: no longer accepting new sessions"
                    );
                }
                self.accepting_new = false;
                let _ = respond_to.send(());
            }

            RegistryMessage::Shutdown { respond_to } => {
                self.accepting_new = false;
                // The run loop performs the actual teardown.
                self.cancel_token.cancel();
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    fn create_session(
        &mut self,
        preset_duration_ms: i64,
        allow_overtime: bool,
    ) -> Result<SessionCreated, TimerError> {
        if !self.accepting_new {
            return Err(TimerError::Draining);
        }

        let code = generate_session_code(
            &self.settings.code_alphabet,
            self.settings.code_length,
            |candidate| self.sessions.contains_key(candidate),
        )?;
        let token = generate_controller_token()?;

        let created_at = self.clock.now_ms();
        let ttl_ms = i64::try_from(self.settings.session_ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = created_at.saturating_add(ttl_ms);

        let (handle, task_handle) = SessionActor::spawn(
            SessionParams {
                code: code.clone(),
                controller_token: SecretString::from(token.as_str()),
                preset_duration_ms,
                allow_overtime,
                created_at,
                expires_at,
            },
            self.cancel_token.child_token(),
            Arc::clone(&self.clock),
            Arc::clone(&self.metrics),
        );

        self.sessions.insert(
            code.clone(),
            ManagedSession {
                handle,
                task_handle,
                created_at,
                expires_at,
            },
        );
        self.metrics.session_created();

        info!(
            target: "timer.actor.registry",
            code = %code,
            preset_duration_ms,
            allow_overtime,
            total_sessions = self.sessions.len(),
            "Session created"
        );

        Ok(SessionCreated {
            code,
            controller_token: SecretString::from(token),
            expires_at,
        })
    }

    fn get_session(&mut self, code: &str) -> Result<SessionActorHandle, TimerError> {
        let Some(managed) = self.sessions.get(code) else {
            return Err(TimerError::SessionNotFound);
        };

        // An ended session cancels itself before anyone removes it.
        if managed.handle.is_cancelled() {
            self.drop_session(code);
            return Err(TimerError::SessionNotFound);
        }

        Ok(managed.handle.clone())
    }

    fn remove_session(&mut self, code: &str) -> Result<(), TimerError> {
        if self.drop_session(code) {
            Ok(())
        } else {
            Err(TimerError::SessionNotFound)
        }
    }

    /// Remove from the map and stop the actor without blocking the loop.
    fn drop_session(&mut self, code: &str) -> bool {
        let Some(managed) = self.sessions.remove(code) else {
            return false;
        };

        managed.handle.cancel();
        self.metrics.session_removed();

        let lifetime_ms = self.clock.now_ms() - managed.created_at;
        info!(
            target: "timer.actor.registry",
            code = %code,
            lifetime_ms,
            total_sessions = self.sessions.len(),
            "Session removed"
        );

        let code_owned = code.to_string();
        tokio::spawn(async move {
            match tokio::time::timeout(SESSION_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "timer.actor.registry",
                        code = %code_owned,
                        error = ?e,
                        "Session actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "timer.actor.registry",
                        code = %code_owned,
                        "Session actor task cleanup timed out"
                    );
                }
            }
        });

        true
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            session_count: self.sessions.len(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
            mailbox_peak_depth: self.mailbox.peak_depth(),
        }
    }

    /// End and remove every session whose `expiresAt` has passed.
    async fn evict_expired(&mut self) {
        let now = self.clock.now_ms();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, managed)| managed.expires_at <= now)
            .map(|(code, _)| code.clone())
            .collect();

        if expired.is_empty() {
            return;
        }

        info!(
            target: "timer.actor.registry",
            count = expired.len(),
            "Evicting expired sessions"
        );

        for code in expired {
            if let Some(managed) = self.sessions.get(&code) {
                // Session actors never call back into the registry.
                if let Err(e) = managed.handle.end(EndReason::Expired).await {
                    debug!(
                        target: "timer.actor.registry",
                        code = %code,
                        error = %e,
                        "Expired session already stopped"
                    );
                }
            }
            self.drop_session(&code);
        }
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "timer.actor.registry",
            session_count = self.sessions.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.sessions.values() {
            managed.handle.cancel();
        }

        for (code, managed) in self.sessions.drain() {
            match tokio::time::timeout(SESSION_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "timer.actor.registry",
                        code = %code,
                        "Session actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "timer.actor.registry",
                        code = %code,
                        error = ?e,
                        "Session actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "timer.actor.registry",
                        code = %code,
                        "Session actor shutdown timed out"
                    );
                }
            }
            self.metrics.session_removed();
        }

        info!(
            target: "timer.actor.registry",
            "Graceful shutdown complete"
        );
    }

    /// Reap session tasks that stopped on their own.
    async fn check_session_health(&mut self) {
        let finished: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(code, _)| code.clone())
            .collect();

        for code in finished {
            if let Some(managed) = self.sessions.remove(&code) {
                match managed.task_handle.await {
                    Ok(()) => {
                        debug!(
                            target: "timer.actor.registry",
                            code = %code,
                            "Session actor exited, reaping"
                        );
                    }
                    Err(join_error) => {
                        if join_error.is_panic() {
                            error!(
                                target: "timer.actor.registry",
                                code = %code,
                                error = ?join_error,
                                "Session actor panicked"
                            );
                            self.metrics.record_panic(ActorType::Session);
                        }
                    }
                }

                self.metrics.session_removed();
            }
        }
    }
}
