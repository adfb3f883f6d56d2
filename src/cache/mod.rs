//! Page cache: keys, the stored object model, and the S3-backed store.
//!
//! Freshness is purely a function of the stored `updated_at` instant and
//! the configured TTL; there is no stored expiry and no eviction here —
//! storage reclamation is the object store's concern.

mod keys;
mod s3;
mod store;

pub use keys::{CacheKey, GLOBAL_REFRESH_LOCK_KEY};
pub use s3::S3Store;
pub use store::{
    CachedObject, ObjectStore, StoreError, UPDATED_AT_META_KEY, encode_updated_at, is_expired,
    parse_updated_at,
};
