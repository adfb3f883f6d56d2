//! Request classification.
//!
//! Decides whether a request may be served from the page cache and, when
//! it may, which (title, variant) pair it addresses. Everything refused
//! here falls through to the transparent origin passthrough.

use std::collections::HashSet;

use axum::http::{HeaderMap, Method, Uri, header::ACCEPT_LANGUAGE};
use url::form_urlencoded;

use crate::domain::{Variant, title, variant};

/// A cacheable page address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub title: String,
    pub variant: Variant,
}

/// Classification outcome for one incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestInfo {
    Cacheable(PageRequest),
    NotCacheable { reason: &'static str },
}

impl RequestInfo {
    fn refused(reason: &'static str) -> Self {
        RequestInfo::NotCacheable { reason }
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            RequestInfo::Cacheable(_) => None,
            RequestInfo::NotCacheable { reason } => Some(reason),
        }
    }
}

/// Classify a request into a cacheable page address or a refusal.
pub fn classify(method: &Method, uri: &Uri, headers: &HeaderMap) -> RequestInfo {
    if method != Method::GET {
        return RequestInfo::refused("method-not-get");
    }

    let path = uri.path();
    let remaining = strip_utm_params(uri.query().unwrap_or(""));
    if !query_is_cacheable(path, &remaining) {
        return RequestInfo::refused("extra-query");
    }

    if let Some(rest) = path.strip_prefix("/wiki/") {
        return build_cacheable(rest, negotiated_variant(headers));
    }
    if let Some(rest) = path.strip_prefix("/zh-hans/") {
        return build_cacheable(rest, Variant::Simplified);
    }
    if let Some(rest) = path.strip_prefix("/zh-hant/") {
        return build_cacheable(rest, Variant::Traditional);
    }
    if let Some(rest) = path.strip_prefix("/zh/") {
        return build_cacheable(rest, Variant::Generic);
    }
    if path == "/index.php" {
        let raw_title = remaining
            .iter()
            .find(|(key, _)| key == "title")
            .map(|(_, value)| value.as_str())
            .unwrap_or("");
        if raw_title.is_empty() {
            return RequestInfo::refused("missing-title");
        }
        return build_cacheable(raw_title, negotiated_variant(headers));
    }

    RequestInfo::refused("not-page")
}

fn build_cacheable(raw_title: &str, variant: Variant) -> RequestInfo {
    let normalized = title::normalize(raw_title);
    if normalized.is_empty() {
        return RequestInfo::refused("empty-title");
    }
    if title::is_special_page(&normalized) {
        return RequestInfo::refused("special-page");
    }
    RequestInfo::Cacheable(PageRequest {
        title: normalized,
        variant,
    })
}

fn negotiated_variant(headers: &HeaderMap) -> Variant {
    let header = headers
        .get(ACCEPT_LANGUAGE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    variant::from_accept_language(header)
}

/// Drop analytics parameters (`utm_*`, case-insensitive) from the query.
fn strip_utm_params(query: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| !key.to_lowercase().starts_with("utm_"))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

/// After utm-stripping, a request stays cacheable only with no remaining
/// parameters — or, for `/index.php`, with `title` as the sole parameter
/// name (compared case-insensitively).
fn query_is_cacheable(path: &str, remaining: &[(String, String)]) -> bool {
    if remaining.is_empty() {
        return true;
    }
    if path == "/index.php" {
        let names: HashSet<String> = remaining
            .iter()
            .map(|(key, _)| key.to_lowercase())
            .collect();
        return names.len() == 1 && names.contains("title");
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_get(target: &str) -> RequestInfo {
        let uri: Uri = target.parse().expect("test uri");
        classify(&Method::GET, &uri, &HeaderMap::new())
    }

    fn classify_get_with_language(target: &str, accept_language: &str) -> RequestInfo {
        let uri: Uri = target.parse().expect("test uri");
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, accept_language.parse().unwrap());
        classify(&Method::GET, &uri, &headers)
    }

    fn expect_page(info: RequestInfo) -> PageRequest {
        match info {
            RequestInfo::Cacheable(page) => page,
            RequestInfo::NotCacheable { reason } => panic!("refused: {reason}"),
        }
    }

    #[test]
    fn non_get_methods_are_refused() {
        let uri: Uri = "/wiki/Pikachu".parse().unwrap();
        let info = classify(&Method::POST, &uri, &HeaderMap::new());
        assert_eq!(info.reason(), Some("method-not-get"));
    }

    #[test]
    fn wiki_path_negotiates_variant() {
        let page = expect_page(classify_get("/wiki/Pikachu"));
        assert_eq!(page.title, "Pikachu");
        assert_eq!(page.variant, Variant::Generic);

        let page = expect_page(classify_get_with_language(
            "/wiki/Pikachu",
            "zh-TW;q=0.9, zh-CN;q=0.8",
        ));
        assert_eq!(page.variant, Variant::Traditional);
    }

    #[test]
    fn explicit_variant_paths_skip_negotiation() {
        let page = expect_page(classify_get_with_language("/zh-hans/Pikachu", "zh-TW"));
        assert_eq!(page.variant, Variant::Simplified);

        let page = expect_page(classify_get("/zh-hant/Pikachu"));
        assert_eq!(page.variant, Variant::Traditional);

        let page = expect_page(classify_get_with_language("/zh/Pikachu", "zh-CN"));
        assert_eq!(page.variant, Variant::Generic);
    }

    #[test]
    fn utm_parameters_are_stripped() {
        let page = expect_page(classify_get("/wiki/Pikachu?utm_foo=bar"));
        assert_eq!(page.title, "Pikachu");

        let info = classify_get("/wiki/Pikachu?utm_foo=bar&x=1");
        assert_eq!(info.reason(), Some("extra-query"));
    }

    #[test]
    fn index_php_accepts_only_the_title_parameter() {
        let page = expect_page(classify_get("/index.php?title=Foo&utm_x=y"));
        assert_eq!(page.title, "Foo");

        let info = classify_get("/index.php?title=Foo&action=edit");
        assert_eq!(info.reason(), Some("extra-query"));

        let info = classify_get("/index.php?foo=1");
        assert_eq!(info.reason(), Some("extra-query"));
    }

    #[test]
    fn index_php_without_title_value_is_refused() {
        let info = classify_get("/index.php");
        assert_eq!(info.reason(), Some("missing-title"));

        // The exemption compares names case-insensitively, but the lookup
        // itself is exact, as in the origin's router.
        let info = classify_get("/index.php?Title=Foo");
        assert_eq!(info.reason(), Some("missing-title"));
    }

    #[test]
    fn special_pages_are_refused_any_case() {
        for target in [
            "/wiki/Special:Log",
            "/wiki/special:Random",
            "/index.php?title=SPECIAL:Export",
        ] {
            assert_eq!(classify_get(target).reason(), Some("special-page"));
        }
    }

    #[test]
    fn traversal_titles_normalize_before_caching() {
        let page = expect_page(classify_get("/wiki/../../etc/passwd"));
        assert_eq!(page.title, "etc/passwd");
    }

    #[test]
    fn empty_titles_are_refused() {
        assert_eq!(classify_get("/wiki/..").reason(), Some("empty-title"));
    }

    #[test]
    fn unrelated_paths_are_not_pages() {
        assert_eq!(classify_get("/robots.txt").reason(), Some("not-page"));
        assert_eq!(classify_get("/").reason(), Some("not-page"));
        assert_eq!(classify_get("/api.php").reason(), Some("not-page"));
    }
}
