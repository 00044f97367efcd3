//! Observability for the timer service.
//!
//! Provides Prometheus metrics definitions and recording helpers.

pub mod metrics;
