//! Health check handler.

use crate::models::HealthResponse;
use axum::Json;
use tracing::instrument;

/// Handler for GET /api/health
///
/// Liveness only; the process answering is the signal.
///
/// ```json
/// { "ok": true }
/// ```
#[instrument(skip_all, name = "timer.health.check")]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}
