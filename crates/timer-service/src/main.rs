//! Timer Service
//!
//! Serves the session API and the real-time WebSocket channel.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (pretty or JSON)
//! 3. Initialize Prometheus metrics recorder
//! 4. Spawn the session registry actor
//! 5. Serve HTTP until SIGINT/SIGTERM
//!
//! # Shutdown Flow
//!
//! 1. Stop creating sessions (`POST /api/session` answers 503)
//! 2. Optional drain period (`DRAIN_SECONDS`)
//! 3. Shut down the registry: members receive `ended`, sockets close

use std::net::SocketAddr;
use std::sync::Arc;

use timer_service::actors::{ActorMetrics, RegistrySettings, SessionRegistryActorHandle};
use timer_service::clock::SystemClock;
use timer_service::config::{Config, LogFormat};
use timer_service::observability::metrics::init_metrics_recorder;
use timer_service::routes::{self, AppState};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration is read first so LOG_FORMAT can pick the formatter
    let config = Config::from_env();
    let log_format = config
        .as_ref()
        .map(|c| c.log_format)
        .unwrap_or_default();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "timer_service=debug,tower_http=debug".into()),
        )
        .with((log_format == LogFormat::Json).then(|| tracing_subscriber::fmt::layer().json()))
        .with((log_format == LogFormat::Pretty).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting Timer Service");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        cors_allow_all = config.cors_allow_all,
        session_ttl_minutes = config.session_ttl.as_secs() / 60,
        eviction_enabled = config.eviction_enabled,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let registry = SessionRegistryActorHandle::new(
        RegistrySettings::from(&config),
        SystemClock::shared(),
        ActorMetrics::new(),
    );
    info!("Session registry started");

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let drain_period = config.drain_period;

    let state = Arc::new(AppState {
        config,
        registry: registry.clone(),
    });
    let app = routes::build_routes(state, metrics_handle);

    info!("Timer Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind listener");
        e
    })?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;

        if let Err(e) = registry.begin_drain().await {
            warn!(error = %e, "Failed to start drain");
        }

        if drain_period.is_zero() {
            info!("Skipping drain period (DRAIN_SECONDS=0)");
        } else {
            warn!("Draining for {} seconds...", drain_period.as_secs());
            tokio::time::sleep(drain_period).await;
            info!("Drain period complete");
        }

        if let Err(e) = registry.shutdown().await {
            warn!(error = %e, "Session registry shutdown error");
        }
    })
    .await?;

    info!("Timer Service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
