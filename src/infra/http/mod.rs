//! HTTP surface: router, shared state, and the serve/purge pipelines.

mod classify;
pub mod middleware;
mod proxy;
mod purge;
mod serve;

pub use classify::{PageRequest, RequestInfo, classify};
pub use proxy::ReverseProxy;
pub use purge::{EdgePurgeError, EdgePurger};

use std::sync::Arc;

use axum::{
    Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    response::Response,
    routing::any,
};

use crate::cache::ObjectStore;
use crate::config::Settings;
use crate::infra::lock::LockClient;
use crate::infra::origin::OriginClient;

const PURGE_METHOD: &str = "PURGE";

/// Everything a request handler needs; cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn ObjectStore>,
    pub locks: LockClient,
    pub origin: Arc<OriginClient>,
    pub proxy: Arc<ReverseProxy>,
    pub edge: Option<Arc<EdgePurger>>,
}

pub fn build_router(state: AppState) -> Router {
    let deadline = state.settings.server.write_timeout;
    Router::new()
        .route("/healthz", any(health))
        .route("/readyz", any(health))
        .fallback(dispatch)
        .with_state(state)
        .layer(from_fn(middleware::log_responses))
        .layer(from_fn_with_state(deadline, middleware::enforce_deadline))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// Method-name dispatch at the process entry: PURGE goes to the purge
/// pipeline, everything else to the serve pipeline.
async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    if request.method().as_str() == PURGE_METHOD {
        purge::handle(state, request).await
    } else {
        serve::handle(state, request).await
    }
}
