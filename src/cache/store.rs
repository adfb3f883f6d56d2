//! Object model and store contract.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

use super::keys::CacheKey;

/// Metadata field carrying the render instant, as a decimal Unix second.
pub const UPDATED_AT_META_KEY: &str = "updated_at";

/// A fully-rendered page body as stored for one (variant, title) pair.
///
/// `updated_at` is the wall-clock instant of the fill that produced the
/// body; `None` means the instant is unknown, which always counts as
/// expired.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedObject {
    pub body: Bytes,
    pub content_type: String,
    pub content_encoding: String,
    pub updated_at: Option<OffsetDateTime>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// No object exists under the key. Expected case; drives the miss path.
    #[error("cache object not found")]
    NotFound,
    #[error("object store transport error: {0}")]
    Transport(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// Blob KV holding one object per cache key, with `updated_at` as the only
/// recognized user-metadata field.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<CachedObject, StoreError>;

    /// The stored `updated_at` without fetching the body.
    async fn updated_at(&self, key: &CacheKey) -> Result<Option<OffsetDateTime>, StoreError>;

    /// Atomic at object granularity.
    async fn put(&self, key: &CacheKey, object: &CachedObject) -> Result<(), StoreError>;

    /// Idempotent.
    async fn delete(&self, key: &CacheKey) -> Result<(), StoreError>;
}

/// Whether a stored instant has aged past the freshness window.
///
/// There is no stored expiry: freshness is purely a function of
/// `updated_at` and the configured TTL. A non-positive TTL disables
/// expiry; an unknown instant never counts as fresh.
pub fn is_expired(updated_at: Option<OffsetDateTime>, ttl_seconds: i64) -> bool {
    let Some(updated_at) = updated_at else {
        return true;
    };
    if ttl_seconds <= 0 {
        return false;
    }
    updated_at + Duration::seconds(ttl_seconds) < OffsetDateTime::now_utc()
}

/// Parse the `updated_at` metadata value; malformed input is an unknown
/// instant, not an error.
pub fn parse_updated_at(value: &str) -> Option<OffsetDateTime> {
    let unix: i64 = value.parse().ok()?;
    OffsetDateTime::from_unix_timestamp(unix).ok()
}

/// Render an instant as the decimal Unix second stored in metadata.
pub fn encode_updated_at(updated_at: OffsetDateTime) -> String {
    updated_at.unix_timestamp().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_instant_is_always_expired() {
        assert!(is_expired(None, 3600));
        assert!(is_expired(None, 0));
    }

    #[test]
    fn recent_instant_is_fresh() {
        let now = OffsetDateTime::now_utc();
        assert!(!is_expired(Some(now), 3600));
        assert!(!is_expired(Some(now - Duration::seconds(10)), 3600));
    }

    #[test]
    fn aged_instant_is_expired() {
        let old = OffsetDateTime::now_utc() - Duration::days(31);
        assert!(is_expired(Some(old), 30 * 24 * 3600));
    }

    #[test]
    fn non_positive_ttl_disables_expiry() {
        let ancient = OffsetDateTime::now_utc() - Duration::days(3650);
        assert!(!is_expired(Some(ancient), 0));
        assert!(!is_expired(Some(ancient), -1));
    }

    #[test]
    fn updated_at_round_trips_through_metadata() {
        let instant = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let encoded = encode_updated_at(instant);
        assert_eq!(encoded, "1700000000");
        assert_eq!(parse_updated_at(&encoded), Some(instant));
    }

    #[test]
    fn malformed_metadata_is_unknown() {
        assert_eq!(parse_updated_at(""), None);
        assert_eq!(parse_updated_at("not-a-number"), None);
        assert_eq!(parse_updated_at("12.5"), None);
    }
}
