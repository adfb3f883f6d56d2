//! Serve pipeline.
//!
//! Cache lookup → freshness check → single-flight fill → stale-serve
//! fallback → origin passthrough. Every cache-served response carries an
//! `X-Inazuma-Cache` tag naming the path it took.

use std::time::Duration;

use axum::{
    body::Body,
    extract::Request,
    http::{
        HeaderMap, HeaderName, HeaderValue,
        header::{CONTENT_ENCODING, CONTENT_TYPE, COOKIE},
    },
    response::Response,
};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{CacheKey, CachedObject, GLOBAL_REFRESH_LOCK_KEY, StoreError, is_expired};
use crate::infra::origin::{OriginError, OriginResponse};

use super::AppState;
use super::classify::{PageRequest, RequestInfo, classify};
use super::proxy::strip_hop_by_hop;

/// Poll cadence while waiting for another task's single-flight fill. A
/// hard design constant: it bounds thundering-herd latency at the cost of
/// extra store reads.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-inazuma-cache");

/// Which of the four cache-served paths produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheStatus {
    Hit,
    Stale,
    Refresh,
    Miss,
}

impl CacheStatus {
    fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Stale => "STALE",
            CacheStatus::Refresh => "REFRESH",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Entry point for everything that is not a purge or health probe.
pub async fn handle(state: AppState, request: Request) -> Response {
    if is_logged_in(&request, &state.settings.auth.logged_in_cookie) {
        return state.proxy.forward(request).await;
    }

    let info = classify(request.method(), request.uri(), request.headers());
    let page = match info {
        RequestInfo::Cacheable(page) => page,
        RequestInfo::NotCacheable { reason } => {
            debug!(
                target = "inazuma::http::serve",
                reason,
                path = %request.uri().path(),
                "request not cacheable"
            );
            return state.proxy.forward(request).await;
        }
    };

    let key = CacheKey::derive(page.variant, &page.title);
    let ttl_seconds = state.settings.cache.ttl_seconds;

    match state.store.get(&key).await {
        Ok(object) => {
            if !is_expired(object.updated_at, ttl_seconds) {
                return write_object(&object, CacheStatus::Hit);
            }
            if let Some(response) = try_refresh_expired(&state, &key, &page).await {
                return response;
            }
            debug!(target = "inazuma::http::serve", key = %key, "serving stale object");
            write_object(&object, CacheStatus::Stale)
        }
        Err(StoreError::NotFound) => {
            debug!(target = "inazuma::http::serve", key = %key, "cache miss");
            match fill_missing(&state, &key, &page).await {
                FillOutcome::Filled(object) => write_object(&object, CacheStatus::Miss),
                FillOutcome::Upstream(upstream) => relay_upstream(&upstream),
                FillOutcome::Fallback => state.proxy.forward(request).await,
            }
        }
        Err(err) => {
            warn!(
                target = "inazuma::http::serve",
                key = %key,
                error = %err,
                "store lookup failed; passing through"
            );
            state.proxy.forward(request).await
        }
    }
}

/// Non-empty session cookie means a logged-in user whose personalized
/// rendering must never come from the shared cache.
fn is_logged_in(request: &Request, cookie_name: &str) -> bool {
    let name = cookie_name.trim();
    if name.is_empty() {
        return false;
    }
    for header in request.headers().get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next().unwrap_or("").trim();
            let value = parts.next().unwrap_or("").trim().trim_matches('"');
            if key == name && !value.is_empty() {
                return true;
            }
        }
    }
    false
}

enum FillOutcome {
    Filled(CachedObject),
    Upstream(OriginResponse),
    Fallback,
}

#[derive(Debug, Error)]
enum FetchError {
    #[error(transparent)]
    Origin(#[from] OriginError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

enum FetchOutcome {
    Stored(CachedObject),
    Upstream(OriginResponse),
}

/// Fetch the variant rendering from the origin and, on 200, persist it
/// stamped with the current wall clock. Non-200 answers are returned for
/// the caller to relay and are never cached.
async fn fetch_and_store(
    state: &AppState,
    key: &CacheKey,
    page: &PageRequest,
) -> Result<FetchOutcome, FetchError> {
    let path = page.variant.page_path(&page.title);
    let upstream = state.origin.fetch(&path, "", HeaderMap::new()).await?;
    if !upstream.is_success() {
        return Ok(FetchOutcome::Upstream(upstream));
    }

    let object = CachedObject {
        body: upstream.body.clone(),
        content_type: upstream.content_type(),
        content_encoding: upstream.content_encoding(),
        updated_at: Some(OffsetDateTime::now_utc()),
    };
    state.store.put(key, &object).await?;
    Ok(FetchOutcome::Stored(object))
}

/// Single-flight fill for a missing object.
///
/// One task holds the per-key lock and performs the origin fetch; the
/// rest poll the store in 50 ms quanta until the fill lands or the wait
/// ceiling passes, then fall back to passthrough.
async fn fill_missing(state: &AppState, key: &CacheKey, page: &PageRequest) -> FillOutcome {
    let lock_key = key.lock_key();
    let lock_ttl = state.settings.lock.ttl;
    let deadline = Instant::now() + state.settings.lock.max_wait;

    loop {
        match state.locks.try_lock(&lock_key, lock_ttl).await {
            Ok(Some(guard)) => {
                let outcome = fill_under_lock(state, key, page).await;
                guard.release().await;
                return outcome;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    target = "inazuma::http::serve",
                    key = %key,
                    error = %err,
                    "lock transport failure during fill"
                );
                return FillOutcome::Fallback;
            }
        }

        // Another task holds the lock; its fill may already be visible.
        if let Ok(object) = state.store.get(key).await {
            return FillOutcome::Filled(object);
        }

        if Instant::now() >= deadline {
            return FillOutcome::Fallback;
        }
        tokio::time::sleep(LOCK_POLL_INTERVAL).await;
    }
}

async fn fill_under_lock(state: &AppState, key: &CacheKey, page: &PageRequest) -> FillOutcome {
    // Mandatory re-check: the previous holder may have completed the fill
    // between our lookup and the acquisition.
    if let Ok(object) = state.store.get(key).await {
        return FillOutcome::Filled(object);
    }

    match fetch_and_store(state, key, page).await {
        Ok(FetchOutcome::Stored(object)) => FillOutcome::Filled(object),
        Ok(FetchOutcome::Upstream(upstream)) => FillOutcome::Upstream(upstream),
        Err(err) => {
            warn!(
                target = "inazuma::http::serve",
                key = %key,
                error = %err,
                "origin fill failed"
            );
            FillOutcome::Fallback
        }
    }
}

/// Attempt to re-prime an expired object.
///
/// Takes the fleet-wide refresh lock, then the per-key lock, both
/// non-blocking; failing either leaves the caller to serve the stale
/// body. Returns the response to emit when this task performed (or
/// observed) the refresh.
async fn try_refresh_expired(
    state: &AppState,
    key: &CacheKey,
    page: &PageRequest,
) -> Option<Response> {
    let lock_ttl = state.settings.lock.ttl;

    let global = match state.locks.try_lock(GLOBAL_REFRESH_LOCK_KEY, lock_ttl).await {
        Ok(Some(guard)) => guard,
        Ok(None) => return None,
        Err(err) => {
            warn!(
                target = "inazuma::http::serve",
                error = %err,
                "global refresh lock unavailable"
            );
            return None;
        }
    };

    let per_key = match state.locks.try_lock(&key.lock_key(), lock_ttl).await {
        Ok(Some(guard)) => guard,
        Ok(None) => {
            global.release().await;
            return None;
        }
        Err(err) => {
            warn!(
                target = "inazuma::http::serve",
                key = %key,
                error = %err,
                "per-key lock unavailable for refresh"
            );
            global.release().await;
            return None;
        }
    };

    let response = refresh_under_locks(state, key, page).await;
    per_key.release().await;
    global.release().await;
    response
}

async fn refresh_under_locks(
    state: &AppState,
    key: &CacheKey,
    page: &PageRequest,
) -> Option<Response> {
    // Another refresher may have won between lookup and acquisition.
    if let Ok(current) = state.store.get(key).await {
        if !is_expired(current.updated_at, state.settings.cache.ttl_seconds) {
            return Some(write_object(&current, CacheStatus::Hit));
        }
    }

    match fetch_and_store(state, key, page).await {
        Ok(FetchOutcome::Stored(object)) => Some(write_object(&object, CacheStatus::Refresh)),
        Ok(FetchOutcome::Upstream(upstream)) => {
            // A definitive origin answer below 500 invalidates the stale
            // body; server errors keep it as the fallback of record.
            if upstream.status.as_u16() < 500 {
                if let Err(err) = state.store.delete(key).await {
                    warn!(
                        target = "inazuma::http::serve",
                        key = %key,
                        error = %err,
                        "failed to delete superseded object"
                    );
                }
            }
            Some(relay_upstream(&upstream))
        }
        Err(err) => {
            warn!(
                target = "inazuma::http::serve",
                key = %key,
                error = %err,
                "refresh failed; serving stale"
            );
            None
        }
    }
}

fn write_object(object: &CachedObject, status: CacheStatus) -> Response {
    let mut response = Response::new(Body::from(object.body.clone()));
    let headers = response.headers_mut();
    if !object.content_type.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&object.content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
    }
    if !object.content_encoding.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&object.content_encoding) {
            headers.insert(CONTENT_ENCODING, value);
        }
    }
    headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status.as_str()));
    response
}

/// Relay a non-200 origin answer verbatim, minus connection headers.
fn relay_upstream(upstream: &OriginResponse) -> Response {
    let mut headers = upstream.headers.clone();
    strip_hop_by_hop(&mut headers);

    let mut response = Response::new(Body::from(upstream.body.clone()));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = headers;
    response
}
