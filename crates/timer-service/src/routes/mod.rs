//! HTTP routes for the timer service.
//!
//! Defines the Axum router and application state.

use crate::actors::SessionRegistryActorHandle;
use crate::config::Config;
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Handle to the session registry actor.
    pub registry: SessionRegistryActorHandle,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/api/session` - Create a session (POST)
/// - `/api/health` - Liveness check
/// - `/ws` - Real-time channel (WebSocket upgrade)
/// - `/metrics` - Prometheus metrics endpoint
/// - CORS, TraceLayer, 30 second request timeout, HTTP metrics
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let cors = cors_layer(&state.config);

    let api_routes = Router::new()
        .route("/api/session", post(handlers::create_session))
        .route("/api/health", get(handlers::health_check))
        .route("/ws", get(handlers::ws_upgrade))
        .with_state(state);

    // Metrics route has its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Layer order (bottom-to-top execution):
    // 1. HTTP metrics - records every response (outermost)
    // 2. TimeoutLayer - the upgrade response of /ws returns immediately
    // 3. TraceLayer - request logging
    // 4. CorsLayer - preflight and response headers (innermost)
    api_routes
        .merge(metrics_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

/// Wildcard when `cors_allow_all`, otherwise only `public_origin`.
fn cors_layer(config: &Config) -> CorsLayer {
    let origin = if config.cors_allow_all {
        AllowOrigin::any()
    } else {
        match HeaderValue::from_str(&config.public_origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(e) => {
                warn!(
                    target: "timer.routes",
                    origin = %config.public_origin,
                    error = %e,
                    "PUBLIC_ORIGIN is not a valid header value, cross-origin requests disabled"
                );
                AllowOrigin::list(Vec::<HeaderValue>::new())
            }
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}
