//! WebSocket client for transport tests.
//!
//! Wraps a `tokio-tungstenite` stream connected to `ws://addr/ws` with
//! timeouts and JSON helpers.

use anyhow::{anyhow, bail, Context};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// A frame as received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    Text(String),
    Close,
    Other,
}

/// WebSocket connection to a test server.
pub struct TestWsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestWsClient {
    /// Connect to `ws://addr/ws` and complete the upgrade.
    pub async fn connect(addr: SocketAddr) -> Result<Self, anyhow::Error> {
        let (stream, response) = connect_async(format!("ws://{addr}/ws"))
            .await
            .context("WebSocket upgrade failed")?;

        if response.status().as_u16() != 101 {
            bail!("upgrade refused: {}", response.status());
        }

        Ok(Self { stream })
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.stream.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    pub async fn send_json(&mut self, value: &Value) -> Result<(), anyhow::Error> {
        self.send_text(&value.to_string()).await
    }

    /// Read the next server frame. End of stream counts as `Close`.
    pub async fn read_frame(&mut self) -> Result<WsFrame, anyhow::Error> {
        let next = tokio::time::timeout(READ_TIMEOUT, self.stream.next())
            .await
            .map_err(|_| anyhow!("read timed out"))?;

        Ok(match next {
            Some(Ok(Message::Text(text))) => WsFrame::Text(text),
            Some(Ok(Message::Close(_))) | None => WsFrame::Close,
            Some(Ok(_)) => WsFrame::Other,
            Some(Err(e)) => return Err(e.into()),
        })
    }

    /// Next text frame parsed as JSON, skipping control frames.
    pub async fn recv_json(&mut self) -> Result<Value, anyhow::Error> {
        loop {
            match self.read_frame().await? {
                WsFrame::Text(text) => return Ok(serde_json::from_str(&text)?),
                WsFrame::Close => bail!("server closed the socket"),
                WsFrame::Other => continue,
            }
        }
    }

    /// Wait for the server to close the socket, skipping anything else.
    pub async fn expect_closed(&mut self) -> Result<(), anyhow::Error> {
        loop {
            let next = tokio::time::timeout(READ_TIMEOUT, self.stream.next())
                .await
                .map_err(|_| anyhow!("socket still open after {:?}", READ_TIMEOUT))?;

            match next {
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => continue,
                // Reset after close counts as closed
                Some(Err(_)) => return Ok(()),
            }
        }
    }
}
