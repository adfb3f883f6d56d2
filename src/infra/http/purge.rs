//! Purge pipeline.
//!
//! The origin notifies this service after an edit; each affected variant
//! is conditionally re-rendered into the cache, ordered against the
//! client-supplied purge timestamp so a refresh never regresses an entry
//! that is already newer. When an edge proxy is configured, a PURGE is
//! fanned out to it after every successful store write.

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheKey, CachedObject, StoreError};
use crate::domain::{Variant, title};

use super::AppState;

const PURGE_TIMESTAMP_HEADER: &str = "x-purge-timestamp";
const TITLE_HEADER: &str = "x-title";

// Purge payloads are a single title; anything larger is abuse.
const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
enum PurgeError {
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("{0}")]
    Upstream(String),
}

impl PurgeError {
    fn upstream(err: impl std::fmt::Display) -> Self {
        PurgeError::Upstream(err.to_string())
    }
}

/// Entry point for every request arriving with the PURGE method.
pub async fn handle(state: AppState, request: Request) -> Response {
    match process(&state, request).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(PurgeError::BadRequest(reason)) => (StatusCode::BAD_REQUEST, reason).into_response(),
        Err(PurgeError::Upstream(reason)) => {
            warn!(target = "inazuma::http::purge", reason = %reason, "purge aborted");
            (StatusCode::BAD_GATEWAY, reason).into_response()
        }
    }
}

async fn process(state: &AppState, request: Request) -> Result<(), PurgeError> {
    let headers = request.headers().clone();
    let target = resolve_target(request).await?;
    let purge_time = parse_purge_timestamp(&headers)?;

    info!(
        target = "inazuma::http::purge",
        title = %target.title,
        variants = target.variants.len(),
        "processing purge"
    );

    for variant in target.variants {
        refresh_variant(state, &target.title, variant, purge_time).await?;
    }
    Ok(())
}

struct PurgeTarget {
    title: String,
    variants: Vec<Variant>,
}

/// Identify which (title, variants) a purge addresses.
///
/// Variant-encoded paths take precedence: `/wiki/<t>` refreshes all
/// variants, the `/zh*` prefixes exactly one. Any other path falls back
/// to a title from the query string, the `X-Title` header, or a JSON
/// body, always with an all-variants refresh.
async fn resolve_target(request: Request) -> Result<PurgeTarget, PurgeError> {
    let path = request.uri().path().to_string();

    if let Some(rest) = path.strip_prefix("/wiki/") {
        return PurgeTarget::new(rest, Variant::ALL.to_vec());
    }
    if let Some(rest) = path.strip_prefix("/zh-hans/") {
        return PurgeTarget::new(rest, vec![Variant::Simplified]);
    }
    if let Some(rest) = path.strip_prefix("/zh-hant/") {
        return PurgeTarget::new(rest, vec![Variant::Traditional]);
    }
    if let Some(rest) = path.strip_prefix("/zh/") {
        return PurgeTarget::new(rest, vec![Variant::Generic]);
    }

    let raw = read_title(request).await?;
    PurgeTarget::new(&raw, Variant::ALL.to_vec())
}

impl PurgeTarget {
    fn new(raw_title: &str, variants: Vec<Variant>) -> Result<Self, PurgeError> {
        let trimmed = raw_title.trim();
        if trimmed.is_empty() {
            return Err(PurgeError::BadRequest("title required"));
        }
        let title = title::normalize(trimmed);
        if title.is_empty() {
            return Err(PurgeError::BadRequest("title required"));
        }
        Ok(Self { title, variants })
    }
}

#[derive(Debug, Deserialize)]
struct PurgePayload {
    #[serde(default)]
    title: String,
}

async fn read_title(request: Request) -> Result<String, PurgeError> {
    if let Some(query) = request.uri().query() {
        let title = url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "title")
            .map(|(_, value)| value.into_owned());
        if let Some(title) = title {
            if !title.is_empty() {
                return Ok(title);
            }
        }
    }

    if let Some(value) = request
        .headers()
        .get(TITLE_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        if !value.is_empty() {
            return Ok(value.to_string());
        }
    }

    let body = axum::body::to_bytes(request.into_body(), MAX_PAYLOAD_BYTES)
        .await
        .map_err(|_| PurgeError::BadRequest("title not found"))?;
    if let Ok(payload) = serde_json::from_slice::<PurgePayload>(&body) {
        if !payload.title.is_empty() {
            return Ok(payload.title);
        }
    }

    Err(PurgeError::BadRequest("title not found"))
}

fn parse_purge_timestamp(headers: &HeaderMap) -> Result<OffsetDateTime, PurgeError> {
    let raw = headers
        .get(PURGE_TIMESTAMP_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .trim();
    if raw.is_empty() {
        return Err(PurgeError::BadRequest("missing purge timestamp"));
    }
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|_| PurgeError::BadRequest("invalid purge timestamp"))
}

/// Refresh one variant of the title, unless the stored object is already
/// newer than the purge.
async fn refresh_variant(
    state: &AppState,
    page_title: &str,
    variant: Variant,
    purge_time: OffsetDateTime,
) -> Result<(), PurgeError> {
    let key = CacheKey::derive(variant, page_title);

    if newer_than(state, &key, purge_time).await? {
        return Ok(());
    }

    let guard = match state
        .locks
        .try_lock(&key.lock_key(), state.settings.lock.ttl)
        .await
    {
        Ok(Some(guard)) => guard,
        // Another refresher is on this key; it will finish the job.
        Ok(None) => return Ok(()),
        Err(err) => return Err(PurgeError::upstream(err)),
    };

    let result = refresh_locked(state, &key, page_title, variant, purge_time).await;
    guard.release().await;
    result
}

async fn refresh_locked(
    state: &AppState,
    key: &CacheKey,
    page_title: &str,
    variant: Variant,
    purge_time: OffsetDateTime,
) -> Result<(), PurgeError> {
    // Double-checked against racing purges and fills.
    if newer_than(state, key, purge_time).await? {
        return Ok(());
    }

    let path = variant.page_path(page_title);
    let upstream = state
        .origin
        .fetch(&path, "", HeaderMap::new())
        .await
        .map_err(PurgeError::upstream)?;

    if !upstream.is_success() {
        if upstream.status.as_u16() < 500 {
            // A definitive origin answer: the page is gone or moved.
            if let Err(err) = state.store.delete(key).await {
                warn!(
                    target = "inazuma::http::purge",
                    key = %key,
                    error = %err,
                    "failed to delete object after origin refusal"
                );
            }
            return Ok(());
        }
        return Err(PurgeError::Upstream("upstream non-200 response".to_string()));
    }

    let object = CachedObject {
        body: upstream.body.clone(),
        content_type: upstream.content_type(),
        content_encoding: upstream.content_encoding(),
        updated_at: Some(OffsetDateTime::now_utc()),
    };
    state
        .store
        .put(key, &object)
        .await
        .map_err(PurgeError::upstream)?;

    if let Some(edge) = &state.edge {
        edge.purge(&path).await.map_err(PurgeError::upstream)?;
    }
    Ok(())
}

/// Whether the stored object already postdates the purge timestamp.
async fn newer_than(
    state: &AppState,
    key: &CacheKey,
    purge_time: OffsetDateTime,
) -> Result<bool, PurgeError> {
    match state.store.updated_at(key).await {
        Ok(Some(updated_at)) => Ok(updated_at > purge_time),
        Ok(None) => Ok(false),
        Err(StoreError::NotFound) => Ok(false),
        Err(err) => Err(PurgeError::upstream(err)),
    }
}

#[derive(Debug, Error)]
#[error("edge purge error: {0}")]
pub struct EdgePurgeError(String);

/// Client issuing `PURGE` requests to the configured edge proxy.
pub struct EdgePurger {
    base_url: Url,
    method: Method,
    http: reqwest::Client,
}

impl EdgePurger {
    pub fn new(base_url: &str) -> Result<Self, EdgePurgeError> {
        let base_url = Url::parse(base_url).map_err(|err| EdgePurgeError(err.to_string()))?;
        let method =
            Method::from_bytes(b"PURGE").map_err(|err| EdgePurgeError(err.to_string()))?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| EdgePurgeError(err.to_string()))?;
        Ok(Self {
            base_url,
            method,
            http,
        })
    }

    /// PURGE `<edge>/<variant_path>`; any non-2xx answer is a failure.
    pub async fn purge(&self, variant_path: &str) -> Result<(), EdgePurgeError> {
        let mut url = self.base_url.clone();
        let full_path = format!("{}{}", url.path().trim_end_matches('/'), variant_path);
        url.set_path(&full_path);

        let response = self
            .http
            .request(self.method.clone(), url)
            .send()
            .await
            .map_err(|err| EdgePurgeError(err.to_string()))?;

        if response.status().as_u16() >= 300 {
            return Err(EdgePurgeError("nginx purge failed".to_string()));
        }
        Ok(())
    }
}
