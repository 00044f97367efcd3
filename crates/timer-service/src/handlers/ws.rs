//! WebSocket transport for the real-time channel.
//!
//! - `GET /ws` - upgrade, then exchange JSON text frames
//!
//! Each socket runs two halves:
//!
//! - a reader loop feeding frames to [`ClientConnection`], which also
//!   watches a child of the registry's cancellation token
//! - a writer task draining the connection's outbound mailbox
//!
//! The writer ends once every sender of the mailbox is gone, i.e. the
//! reader has finished and no session still lists the connection. It then
//! sends a close frame.

use crate::actors::{ClientConnection, SessionRegistryActorHandle};
use crate::observability::metrics as prom;
use crate::protocol::ServerMessage;
use crate::routes::AppState;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How long a closing socket waits for queued messages to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handler for GET /ws
#[instrument(skip_all, name = "timer.ws.upgrade")]
pub async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

#[instrument(skip_all, name = "timer.ws.connection")]
async fn handle_socket(socket: WebSocket, registry: SessionRegistryActorHandle) {
    let shutdown = registry.child_token();
    let (connection, outbound) = ClientConnection::new(registry);
    let connection_id = connection.connection_id().to_string();

    info!(target: "timer.ws", connection_id = %connection_id, "WebSocket connected");
    prom::ws_connection_opened();

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_outbound(sink, outbound));

    let connection = read_inbound(stream, connection, &shutdown).await;
    connection.close().await;

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        warn!(
            target: "timer.ws",
            connection_id = %connection_id,
            "Outbound writer did not drain in time, aborting"
        );
        writer.abort();
    }

    prom::ws_connection_closed();
    info!(target: "timer.ws", connection_id = %connection_id, "WebSocket closed");
}

/// Feed inbound frames to the connection until the peer goes away or the
/// server shuts down. Returns the connection so the caller can release it.
async fn read_inbound(
    mut stream: SplitStream<WebSocket>,
    mut connection: ClientConnection,
    shutdown: &CancellationToken,
) -> ClientConnection {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!(
                    target: "timer.ws",
                    connection_id = %connection.connection_id(),
                    "Server shutting down, closing socket"
                );
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        connection.handle_text(&text).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => connection.handle_text(&text).await,
                        Err(_) => {
                            debug!(
                                target: "timer.ws",
                                connection_id = %connection.connection_id(),
                                "Dropping non-UTF-8 binary frame"
                            );
                        }
                    },
                    // Ping/Pong are answered by the WebSocket layer
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(
                            target: "timer.ws",
                            connection_id = %connection.connection_id(),
                            error = %e,
                            "WebSocket read error"
                        );
                        break;
                    }
                }
            }
        }
    }

    connection
}

async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerMessage>,
) {
    while let Some(message) = outbound.recv().await {
        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(target: "timer.ws", error = %e, "Failed to encode outbound message");
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            debug!(target: "timer.ws", error = %e, "WebSocket send failed, peer gone");
            prom::record_send_failure();
            return;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}
