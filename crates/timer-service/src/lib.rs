//! Timer Service Library
//!
//! A shared countdown timer: one authorized controller drives a session,
//! any number of passive displays render it, and every participant derives
//! the remaining time from one authoritative server clock.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> actors/registry.rs -> actors/session.rs
//!                  handlers/ws.rs -> actors/connection.rs ---^
//! ```
//!
//! Session state is owned by one actor per session, so every join, leave
//! and action on a session is applied in a single total order.
//!
//! # Modules
//!
//! - `actors` - Registry, session and connection actors
//! - `clock` - Injectable time source
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP and WebSocket handlers
//! - `ids` - Session code and controller token generation
//! - `middleware` - HTTP metrics middleware
//! - `models` - HTTP request/response bodies
//! - `observability` - Prometheus metrics
//! - `protocol` - Real-time wire messages
//! - `routes` - Axum router setup
//! - `timer` - Timer state machine

pub mod actors;
pub mod clock;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod ids;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod protocol;
pub mod routes;
pub mod timer;
