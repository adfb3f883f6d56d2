//! Transparent origin passthrough.
//!
//! Used for logged-in traffic, non-cacheable requests, and as the
//! degraded path when the cache or lock KV is unreachable. Bodies are
//! buffered end-to-end, matching the rest of the service.

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;
use url::Url;

// Connection-scoped headers that must not travel through a proxy hop.
const HOP_BY_HOP_HEADERS: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
#[error("passthrough error: {0}")]
pub struct ProxyError(String);

pub struct ReverseProxy {
    base_url: Url,
    http: reqwest::Client,
}

impl ReverseProxy {
    pub fn new(base_url: &str) -> Result<Self, ProxyError> {
        let base_url = Url::parse(base_url).map_err(|err| ProxyError(err.to_string()))?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| ProxyError(err.to_string()))?;
        Ok(Self { base_url, http })
    }

    /// Forward the request to the origin and relay the response.
    ///
    /// Transport failures surface as 502; the caller has already decided
    /// this request cannot be served from cache.
    pub async fn forward(&self, request: Request) -> Response {
        match self.try_forward(request).await {
            Ok(response) => response,
            Err(err) => {
                error!(
                    target = "inazuma::http::proxy",
                    error = %err,
                    "passthrough to origin failed"
                );
                (StatusCode::BAD_GATEWAY, "origin unreachable").into_response()
            }
        }
    }

    async fn try_forward(&self, request: Request) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();

        let mut url = self.base_url.clone();
        let full_path = format!("{}{}", url.path().trim_end_matches('/'), parts.uri.path());
        url.set_path(&full_path);
        url.set_query(parts.uri.query());

        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|err| ProxyError(err.to_string()))?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        let upstream = self
            .http
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|err| ProxyError(err.to_string()))?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        let bytes = upstream
            .bytes()
            .await
            .map_err(|err| ProxyError(err.to_string()))?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}
