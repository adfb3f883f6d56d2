//! Request-scoped middleware.

use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};

/// Log every completed response; failures carry enough context to chase
/// the upstream cause without request replay.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis();

    if status.is_server_error() {
        error!(
            target = "inazuma::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            query = uri.query().unwrap_or(""),
            elapsed_ms = elapsed_ms,
            "request failed",
        );
    } else if status.is_client_error() {
        warn!(
            target = "inazuma::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            query = uri.query().unwrap_or(""),
            elapsed_ms = elapsed_ms,
            "client request error",
        );
    } else {
        debug!(
            target = "inazuma::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            elapsed_ms = elapsed_ms,
            "request completed",
        );
    }

    response
}

/// Bound the total time spent producing a response, standing in for the
/// listener's write deadline.
pub async fn enforce_deadline(
    State(deadline): State<Duration>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            error!(
                target = "inazuma::http::response",
                deadline_ms = deadline.as_millis(),
                "request exceeded the response deadline"
            );
            (StatusCode::GATEWAY_TIMEOUT, "response deadline exceeded").into_response()
        }
    }
}
