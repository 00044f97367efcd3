//! HTTP and WebSocket request handlers for the timer service.

pub mod health;
pub mod metrics;
pub mod sessions;
pub mod ws;

pub use health::health_check;
pub use metrics::metrics_handler;
pub use sessions::create_session;
pub use ws::ws_upgrade;
