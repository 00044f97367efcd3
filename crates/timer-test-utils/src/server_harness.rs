//! Test server harness for E2E testing
//!
//! Provides `TestTimerServer` for spawning real timer server instances in
//! tests.

use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use timer_service::actors::{ActorMetrics, RegistrySettings, SessionRegistryActorHandle};
use timer_service::clock::{Clock, SystemClock};
use timer_service::config::Config;
use timer_service::models::CreateSessionResponse;
use timer_service::observability::metrics::build_recorder;
use timer_service::routes::{self, AppState};
use tokio::task::JoinHandle;

/// Test harness for spawning the timer server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let server = TestTimerServer::spawn().await?;
///
///     let response = reqwest::get(format!("{}/api/health", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestTimerServer {
    addr: SocketAddr,
    config: Config,
    registry: SessionRegistryActorHandle,
    _handle: JoinHandle<()>,
}

impl TestTimerServer {
    /// Spawn a server with default configuration and the system clock.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(HashMap::new(), SystemClock::shared()).await
    }

    /// Spawn a server with extra environment variables and a custom clock.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    /// - Use a metrics handle that is not installed globally
    pub async fn spawn_with(
        extra_vars: HashMap<String, String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string())]);
        vars.extend(extra_vars);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let registry = SessionRegistryActorHandle::new(
            RegistrySettings::from(&config),
            clock,
            ActorMetrics::new(),
        );

        let metrics_handle: PrometheusHandle = build_recorder()
            .map_err(|e| anyhow::anyhow!("Failed to build metrics recorder: {}", e))?
            .handle();

        let state = Arc::new(AppState {
            config: config.clone(),
            registry: registry.clone(),
        });

        // Build routes using timer-service's real route builder
        let app = routes::build_routes(state, metrics_handle);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        // Spawn server in background
        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            registry,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registry behind the server, for in-memory clients and assertions.
    pub fn registry(&self) -> &SessionRegistryActorHandle {
        &self.registry
    }

    /// `POST /api/session` with `body`, expecting 200.
    pub async fn create_session(
        &self,
        body: serde_json::Value,
    ) -> Result<CreateSessionResponse, anyhow::Error> {
        let response = reqwest::Client::new()
            .post(format!("{}/api/session", self.url()))
            .json(&body)
            .send()
            .await?;

        anyhow::ensure!(
            response.status() == 200,
            "create session failed with status {}",
            response.status()
        );

        Ok(response.json().await?)
    }
}

impl Drop for TestTimerServer {
    fn drop(&mut self) {
        self._handle.abort();
        self.registry.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let server = TestTimerServer::spawn().await?;

        assert!(server.url().starts_with("http://127.0.0.1:"));

        let response = reqwest::get(format!("{}/api/health", server.url())).await?;
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = response.json().await?;
        assert_eq!(body["ok"], true);

        Ok(())
    }

    #[tokio::test]
    async fn test_server_provides_addr() -> Result<(), anyhow::Error> {
        let server = TestTimerServer::spawn().await?;

        let addr = server.addr();
        assert!(addr.ip().is_loopback());
        assert!(addr.port() > 0);
        assert_eq!(server.url(), format!("http://{}", addr));

        Ok(())
    }

    #[tokio::test]
    async fn test_create_session_helper() -> Result<(), anyhow::Error> {
        let server = TestTimerServer::spawn().await?;

        let session = server.create_session(serde_json::json!({})).await?;
        assert_eq!(session.code.len(), server.config().code_length);

        let status = server.registry().get_status().await?;
        assert_eq!(status.session_count, 1);

        Ok(())
    }
}
