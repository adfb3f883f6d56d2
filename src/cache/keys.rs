//! Cache key derivation.
//!
//! A key is `<variant-tag>/<normalized-title>`. Variant tags contain no
//! slash, so the leading segment namespaces the key and two distinct
//! (variant, title) pairs can never collide. Keys are plain strings and
//! therefore stable across restarts and across instances.

use std::fmt;

use crate::domain::Variant;

/// Identifier a [`CachedObject`](super::CachedObject) is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a (variant, normalized title) pair.
    pub fn derive(variant: Variant, title: &str) -> Self {
        Self(format!("{}/{}", variant.as_str(), title))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the distributed lock guarding fills and refreshes of this
    /// object.
    pub fn lock_key(&self) -> String {
        format!("lock:{}", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lock key serializing stale-object refreshes across the whole fleet.
pub const GLOBAL_REFRESH_LOCK_KEY: &str = "lock:global-refresh";
