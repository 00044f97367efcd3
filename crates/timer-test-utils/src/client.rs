//! In-memory protocol client.
//!
//! `TestClient` drives a real [`ClientConnection`] against a real registry
//! and reads what the session actors push to it, with no socket in between.

use serde_json::{json, Value};
use std::time::Duration;
use timer_service::actors::{ClientConnection, SessionRegistryActorHandle};
use timer_service::protocol::{Counts, Role, ServerMessage, StateSnapshot};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// How long `recv` waits before failing the test.
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long `assert_silent` listens for stray messages.
const SILENCE_WINDOW: Duration = Duration::from_millis(50);

/// One simulated participant.
pub struct TestClient {
    connection: ClientConnection,
    outbound: mpsc::Receiver<ServerMessage>,
}

impl TestClient {
    pub fn new(registry: &SessionRegistryActorHandle) -> Self {
        let (connection, outbound) = ClientConnection::new(registry.clone());
        Self {
            connection,
            outbound,
        }
    }

    pub fn connection(&self) -> &ClientConnection {
        &self.connection
    }

    /// Deliver a raw text frame.
    pub async fn send_text(&mut self, text: &str) {
        self.connection.handle_text(text).await;
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send_text(&value.to_string()).await;
    }

    pub async fn join(&mut self, role: &str, code: &str, token: Option<&str>) {
        let mut frame = json!({ "type": "join", "role": role, "code": code });
        if let Some(token) = token {
            frame["token"] = json!(token);
        }
        self.send_json(frame).await;
    }

    pub async fn action(&mut self, action: &str, payload: Option<Value>) {
        let mut frame = json!({ "type": "action", "action": action });
        if let Some(payload) = payload {
            frame["payload"] = payload;
        }
        self.send_json(frame).await;
    }

    /// Next pushed message; panics after a timeout.
    pub async fn recv(&mut self) -> ServerMessage {
        match tokio::time::timeout(RECV_TIMEOUT, self.outbound.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => panic!("connection mailbox closed"),
            Err(_) => panic!("no message within {:?}", RECV_TIMEOUT),
        }
    }

    /// Next pushed message as it appears on the wire.
    pub async fn recv_json(&mut self) -> Value {
        let message = self.recv().await;
        serde_json::from_str(&message.to_text().expect("encode")).expect("valid JSON")
    }

    pub async fn expect_joined(&mut self) -> (Role, String, Counts) {
        match self.recv().await {
            ServerMessage::Joined { role, code, counts } => (role, code, counts),
            other => panic!("expected joined, got {:?}", other),
        }
    }

    pub async fn expect_state(&mut self) -> StateSnapshot {
        match self.recv().await {
            ServerMessage::State(snapshot) => snapshot,
            other => panic!("expected state, got {:?}", other),
        }
    }

    pub async fn expect_presence(&mut self) -> Counts {
        match self.recv().await {
            ServerMessage::Presence { counts } => counts,
            other => panic!("expected presence, got {:?}", other),
        }
    }

    pub async fn expect_error(&mut self) -> String {
        match self.recv().await {
            ServerMessage::Error { message } => message,
            other => panic!("expected error, got {:?}", other),
        }
    }

    pub async fn expect_ended(&mut self) -> String {
        match self.recv().await {
            ServerMessage::Ended { message, .. } => message,
            other => panic!("expected ended, got {:?}", other),
        }
    }

    /// Join and consume `joined`, `state` and the joiner's own `presence`.
    pub async fn join_ok(&mut self, role: &str, code: &str, token: Option<&str>) -> StateSnapshot {
        self.join(role, code, token).await;
        self.expect_joined().await;
        let snapshot = self.expect_state().await;
        self.expect_presence().await;
        snapshot
    }

    /// Fail if anything arrives within a short window.
    pub async fn assert_silent(&mut self) {
        if let Ok(Some(message)) = tokio::time::timeout(SILENCE_WINDOW, self.outbound.recv()).await
        {
            panic!("expected no message, got {:?}", message);
        }
    }

    /// Everything queued right now.
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        loop {
            match self.outbound.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return messages,
            }
        }
    }

    /// Simulate the transport closing.
    pub async fn close(self) {
        self.connection.close().await;
    }
}
