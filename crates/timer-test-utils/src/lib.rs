//! # Timer Test Utilities
//!
//! Shared test utilities for the timer service.
//!
//! This crate provides:
//! - Server test harness (`TestTimerServer` for E2E tests)
//! - In-memory protocol client (`TestClient`) driving the real-time channel
//!   without a socket
//! - WebSocket client (`TestWsClient`) for transport tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use timer_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let server = TestTimerServer::spawn().await?;
//!     let session = server.create_session(serde_json::json!({})).await?;
//!
//!     let mut display = TestClient::new(server.registry());
//!     display.join("display", &session.code, None).await;
//!     display.expect_joined().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod server_harness;
pub mod ws_client;

// Re-export commonly used items
pub use client::*;
pub use server_harness::*;
pub use ws_client::*;
