//! Distributed advisory locking.
//!
//! A lock is a Redis key holding a random token, created with SET-NX plus
//! a TTL and removed by a compare-and-delete script. The lock is advisory
//! between cooperating instances; the TTL bounds the blast radius of a
//! crashed holder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::{
    Client, ClientLike, Config, Expiration, KeysInterface, LuaInterface, SetOptions,
};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::config::RedisSettings;

// Deletes the key only while it still holds our token, so a holder can
// never remove a lock that expired and was re-acquired by someone else.
const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Debug, Error)]
#[error("lock transport error: {0}")]
pub struct LockError(pub String);

/// The two primitive mutations the lock KV permits.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// SET-if-absent with TTL. True when `token` now holds `key`.
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Compare-and-delete: removes `key` only while it still holds `token`.
    async fn release(&self, key: &str, token: &str) -> Result<(), LockError>;
}

/// Handle for taking locks; cheap to clone and share across tasks.
#[derive(Clone)]
pub struct LockClient {
    backend: Arc<dyn LockBackend>,
}

impl LockClient {
    pub fn new(backend: Arc<dyn LockBackend>) -> Self {
        Self { backend }
    }

    /// Non-blocking acquisition attempt.
    ///
    /// `Ok(Some(guard))` when acquired, `Ok(None)` when another holder has
    /// the key, `Err` only on transport failure.
    pub async fn try_lock(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>, LockError> {
        let token = Uuid::new_v4().simple().to_string();
        if self.backend.acquire(key, &token, ttl).await? {
            Ok(Some(LockGuard {
                backend: Arc::clone(&self.backend),
                key: key.to_string(),
                token,
            }))
        } else {
            Ok(None)
        }
    }
}

/// A held lock, bound to the token of one acquisition.
pub struct LockGuard {
    backend: Arc<dyn LockBackend>,
    key: String,
    token: String,
}

impl LockGuard {
    /// Best-effort release. Failures are logged and swallowed — the TTL is
    /// the safety net, and business operations must not fail on them.
    pub async fn release(self) {
        if let Err(err) = self.backend.release(&self.key, &self.token).await {
            warn!(
                target = "inazuma::lock",
                key = %self.key,
                error = %err,
                "failed to release lock"
            );
        }
    }

    #[cfg(test)]
    fn token(&self) -> &str {
        &self.token
    }
}

/// Redis-backed implementation.
pub struct RedisLockBackend {
    client: Client,
}

impl RedisLockBackend {
    /// Connect and wait for the connection to become usable.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, LockError> {
        let config = Config::from_url(&settings.url()).map_err(|err| LockError(err.to_string()))?;
        let client = Client::new(config, None, None, None);
        let _ = client.connect();
        client
            .wait_for_connect()
            .await
            .map_err(|err| LockError(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let ttl_seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        let reply: Option<String> = self
            .client
            .set(
                key,
                token,
                Some(Expiration::EX(ttl_seconds)),
                Some(SetOptions::NX),
                false,
            )
            .await
            .map_err(|err| LockError(err.to_string()))?;
        Ok(reply.is_some())
    }

    async fn release(&self, key: &str, token: &str) -> Result<(), LockError> {
        let _: i64 = self
            .client
            .eval(
                UNLOCK_SCRIPT,
                vec![key.to_string()],
                vec![token.to_string()],
            )
            .await
            .map_err(|err| LockError(err.to_string()))?;
        Ok(())
    }
}
