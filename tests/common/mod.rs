//! Shared fixtures: in-memory stand-ins for the object store and the lock
//! KV, plus a harness wiring them into the real router.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Router;
use inazuma::cache::{CacheKey, CachedObject, ObjectStore, StoreError};
use inazuma::config::{
    AuthSettings, CacheSettings, LockSettings, LogFormat, LoggingSettings, MediaWikiSettings,
    PurgeSettings, RedisSettings, S3Settings, ServerSettings, Settings,
};
use inazuma::infra::http::{AppState, EdgePurger, ReverseProxy, build_router};
use inazuma::infra::lock::{LockBackend, LockClient, LockError};
use inazuma::infra::origin::OriginClient;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::level_filters::LevelFilter;

/// Object store double honoring the NotFound / transport split.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, CachedObject>>,
    fail_transport: AtomicBool,
}

impl MemoryStore {
    pub async fn insert(&self, key: &CacheKey, object: CachedObject) {
        self.objects
            .lock()
            .await
            .insert(key.as_str().to_string(), object);
    }

    pub async fn object(&self, key: &CacheKey) -> Option<CachedObject> {
        self.objects.lock().await.get(key.as_str()).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub fn set_transport_failure(&self, fail: bool) {
        self.fail_transport.store(fail, Ordering::SeqCst);
    }

    fn check_transport(&self) -> Result<(), StoreError> {
        if self.fail_transport.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<CachedObject, StoreError> {
        self.check_transport()?;
        self.objects
            .lock()
            .await
            .get(key.as_str())
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn updated_at(&self, key: &CacheKey) -> Result<Option<OffsetDateTime>, StoreError> {
        self.check_transport()?;
        self.objects
            .lock()
            .await
            .get(key.as_str())
            .map(|object| object.updated_at)
            .ok_or(StoreError::NotFound)
    }

    async fn put(&self, key: &CacheKey, object: &CachedObject) -> Result<(), StoreError> {
        self.check_transport()?;
        self.objects
            .lock()
            .await
            .insert(key.as_str().to_string(), object.clone());
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.check_transport()?;
        self.objects.lock().await.remove(key.as_str());
        Ok(())
    }
}

/// Lock KV double with real TTL expiry.
#[derive(Default)]
pub struct MemoryLockBackend {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLockBackend {
    /// Plant a foreign holder, as if another instance owned the key.
    pub async fn force_hold(&self, key: &str) {
        self.held.lock().await.insert(
            key.to_string(),
            (
                "foreign-holder".to_string(),
                Instant::now() + Duration::from_secs(3600),
            ),
        );
    }

    pub async fn force_release(&self, key: &str) {
        self.held.lock().await.remove(key);
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut held = self.held.lock().await;
        let now = Instant::now();
        held.retain(|_, (_, expires_at)| *expires_at > now);
        if held.contains_key(key) {
            return Ok(false);
        }
        held.insert(key.to_string(), (token.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &str, token: &str) -> Result<(), LockError> {
        let mut held = self.held.lock().await;
        if held.get(key).map(|(holder, _)| holder.as_str()) == Some(token) {
            held.remove(key);
        }
        Ok(())
    }
}

pub fn test_settings(origin_base: &str) -> Settings {
    Settings {
        server: ServerSettings {
            listen_addr: "127.0.0.1:0".parse().expect("test addr"),
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
        },
        logging: LoggingSettings {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        },
        mediawiki: MediaWikiSettings {
            base_url: origin_base.to_string(),
        },
        redis: RedisSettings {
            addr: "127.0.0.1:6379".to_string(),
            password: String::new(),
            db: 0,
        },
        s3: S3Settings {
            endpoint: "http://127.0.0.1:9000".to_string(),
            region: "us-east-1".to_string(),
            bucket: "pages".to_string(),
            access_key: "access".to_string(),
            secret_key: "secret".to_string(),
        },
        purge: PurgeSettings {
            nginx_purge_url: None,
        },
        auth: AuthSettings {
            logged_in_cookie: "52poke_wikiUserID".to_string(),
        },
        cache: CacheSettings {
            ttl_seconds: 2_592_000,
        },
        lock: LockSettings {
            ttl: Duration::from_secs(45),
            max_wait: Duration::from_secs(3),
        },
    }
}

pub struct Harness {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub locks: Arc<MemoryLockBackend>,
}

pub fn harness(settings: Settings) -> Harness {
    let store = Arc::new(MemoryStore::default());
    let locks = Arc::new(MemoryLockBackend::default());

    let origin =
        Arc::new(OriginClient::new(&settings.mediawiki.base_url).expect("origin client"));
    let proxy = Arc::new(ReverseProxy::new(&settings.mediawiki.base_url).expect("proxy"));
    let edge = settings
        .purge
        .nginx_purge_url
        .as_deref()
        .map(|url| Arc::new(EdgePurger::new(url).expect("edge purger")));

    let state = AppState {
        settings: Arc::new(settings),
        store: store.clone(),
        locks: LockClient::new(locks.clone()),
        origin,
        proxy,
        edge,
    };

    Harness {
        router: build_router(state),
        store,
        locks,
    }
}

pub fn page_object(body: &str, updated_at: OffsetDateTime) -> CachedObject {
    CachedObject {
        body: bytes::Bytes::copy_from_slice(body.as_bytes()),
        content_type: "text/html; charset=utf-8".to_string(),
        content_encoding: String::new(),
        updated_at: Some(updated_at),
    }
}
