//! Origin HTTP client.
//!
//! Thin GET wrapper over the wiki origin. Bodies are always fully
//! buffered — the serve and purge pipelines never stream — and each
//! request is bounded by a 10 second timeout. No retries at this layer.

use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use thiserror::Error;
use url::Url;

const ORIGIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
#[error("origin transport error: {0}")]
pub struct OriginError(pub String);

/// A fully-read origin response.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OriginResponse {
    pub fn is_success(&self) -> bool {
        self.status == StatusCode::OK
    }

    pub fn content_type(&self) -> String {
        self.header_str("content-type")
    }

    pub fn content_encoding(&self) -> String {
        self.header_str("content-encoding")
    }

    fn header_str(&self, name: &str) -> String {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }
}

pub struct OriginClient {
    base_url: Url,
    http: reqwest::Client,
}

impl OriginClient {
    pub fn new(base_url: &str) -> Result<Self, OriginError> {
        let base_url = Url::parse(base_url).map_err(|err| OriginError(err.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(ORIGIN_REQUEST_TIMEOUT)
            .build()
            .map_err(|err| OriginError(err.to_string()))?;
        Ok(Self { base_url, http })
    }

    /// GET `base_url + path?raw_query` with the given extra headers.
    pub async fn fetch(
        &self,
        path: &str,
        raw_query: &str,
        headers: HeaderMap,
    ) -> Result<OriginResponse, OriginError> {
        let mut url = self.base_url.clone();
        let full_path = format!("{}{}", url.path().trim_end_matches('/'), path);
        url.set_path(&full_path);
        url.set_query((!raw_query.is_empty()).then_some(raw_query));

        let response = self
            .http
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|err| OriginError(err.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| OriginError(err.to_string()))?;

        Ok(OriginResponse {
            status,
            headers,
            body,
        })
    }
}
