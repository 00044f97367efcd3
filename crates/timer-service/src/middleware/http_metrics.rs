//! HTTP metrics middleware.
//!
//! Records every response, including the ones axum produces before a
//! handler runs (404, 405, 415) and the 101 of a WebSocket upgrade.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Record method, normalized path, status and latency of each request.
///
/// Applied as the outermost layer so timeouts and CORS rejections are
/// counted too.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());

    response
}
