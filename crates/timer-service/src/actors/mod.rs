//! Actor model implementation for the timer service.
//!
//! ```text
//! SessionRegistryActor (singleton; owns code -> session map)
//! └── SessionActor (one per live session; owns timer fields + membership)
//!     └── ConnectionHandle (one per joined connection; outbound mailbox)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer per session**: every mutation of a session goes through its mailbox
//! - **CancellationToken propagation**: registry root -> session -> WebSocket task
//! - **Best-effort fan-out**: outbound sends never block an actor and never fail it
//! - **Message passing**: All inter-actor communication via `tokio::sync::mpsc` channels
//!
//! # Modules
//!
//! - [`registry`] - `SessionRegistryActor` singleton that supervises sessions
//! - [`session`] - `SessionActor` per live session
//! - [`connection`] - `ConnectionHandle` and the per-connection protocol state
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod session;

// Re-export primary types
pub use connection::{ClientConnection, ConnectionHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, MailboxMonitor};
pub use registry::{RegistrySettings, SessionRegistryActor, SessionRegistryActorHandle};
pub use session::{SessionActor, SessionActorHandle, SessionParams};
