//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "inazuma";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_S3_REGION: &str = "us-east-1";
const DEFAULT_LOGGED_IN_COOKIE: &str = "52poke_wikiUserID";
const DEFAULT_CACHE_TTL_SECONDS: i64 = 2_592_000; // 30 days
const DEFAULT_LOCK_TTL_SECONDS: u64 = 45;
const DEFAULT_MAX_LOCK_WAIT_SECONDS: u64 = 3;

// Listener deadlines, matching the fronting deployment's expectations.
const SERVER_READ_TIMEOUT: Duration = Duration::from_secs(15);
const SERVER_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
const SERVER_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Command-line arguments for the Inazuma binary.
#[derive(Debug, Parser)]
#[command(name = "inazuma", version, about = "Inazuma wiki cache proxy")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "INAZUMA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the caching proxy.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the HTTP bind address.
    #[arg(long = "listen-addr", value_name = "ADDR")]
    pub listen_addr: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the MediaWiki origin base URL.
    #[arg(long = "mediawiki-base-url", value_name = "URL")]
    pub mediawiki_base_url: Option<String>,

    /// Override the lock KV endpoint (host:port).
    #[arg(long = "redis-addr", value_name = "ADDR")]
    pub redis_addr: Option<String>,

    /// Override the edge proxy PURGE base URL.
    #[arg(long = "nginx-purge-url", value_name = "URL")]
    pub nginx_purge_url: Option<String>,

    /// Override the session cookie that bypasses the cache.
    #[arg(long = "logged-in-cookie", value_name = "NAME")]
    pub logged_in_cookie: Option<String>,

    /// Override the cache freshness window in seconds.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<i64>,

    /// Override the lock lease in seconds.
    #[arg(long = "lock-ttl-seconds", value_name = "SECONDS")]
    pub lock_ttl_seconds: Option<u64>,

    /// Override the single-flight wait ceiling in seconds.
    #[arg(long = "max-lock-wait-seconds", value_name = "SECONDS")]
    pub max_lock_wait_seconds: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub mediawiki: MediaWikiSettings,
    pub redis: RedisSettings,
    pub s3: S3Settings,
    pub purge: PurgeSettings,
    pub auth: AuthSettings,
    pub cache: CacheSettings,
    pub lock: LockSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen_addr: SocketAddr,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct MediaWikiSettings {
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub addr: String,
    pub password: String,
    pub db: u8,
}

impl RedisSettings {
    /// Connection URL for the lock KV client.
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}/{}", self.addr, self.db)
        } else {
            format!("redis://:{}@{}/{}", self.password, self.addr, self.db)
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct PurgeSettings {
    pub nginx_purge_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub logged_in_cookie: String,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Freshness window; non-positive disables expiry.
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct LockSettings {
    pub ttl: Duration,
    pub max_wait: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("INAZUMA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    mediawiki: RawMediaWikiSettings,
    redis: RawRedisSettings,
    s3: RawS3Settings,
    purge: RawPurgeSettings,
    auth: RawAuthSettings,
    cache: RawCacheSettings,
    lock: RawLockSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(addr) = overrides.listen_addr.as_ref() {
            self.server.listen_addr = Some(addr.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.mediawiki_base_url.as_ref() {
            self.mediawiki.base_url = Some(url.clone());
        }
        if let Some(addr) = overrides.redis_addr.as_ref() {
            self.redis.addr = Some(addr.clone());
        }
        if let Some(url) = overrides.nginx_purge_url.as_ref() {
            self.purge.nginx_purge_url = Some(url.clone());
        }
        if let Some(name) = overrides.logged_in_cookie.as_ref() {
            self.auth.logged_in_cookie = Some(name.clone());
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
        if let Some(ttl) = overrides.lock_ttl_seconds {
            self.lock.ttl_seconds = Some(ttl);
        }
        if let Some(wait) = overrides.max_lock_wait_seconds {
            self.lock.max_wait_seconds = Some(wait);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            mediawiki,
            redis,
            s3,
            purge,
            auth,
            cache,
            lock,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            mediawiki: build_mediawiki_settings(mediawiki)?,
            redis: build_redis_settings(redis)?,
            s3: build_s3_settings(s3)?,
            purge: build_purge_settings(purge)?,
            auth: build_auth_settings(auth),
            cache: build_cache_settings(cache),
            lock: build_lock_settings(lock)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let addr = server
        .listen_addr
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
    let listen_addr: SocketAddr = addr.parse().map_err(|err| {
        LoadError::invalid(
            "server.listen_addr",
            format!("invalid address `{addr}`: {err}"),
        )
    })?;

    Ok(ServerSettings {
        listen_addr,
        read_timeout: SERVER_READ_TIMEOUT,
        write_timeout: SERVER_WRITE_TIMEOUT,
        idle_timeout: SERVER_IDLE_TIMEOUT,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_mediawiki_settings(
    mediawiki: RawMediaWikiSettings,
) -> Result<MediaWikiSettings, LoadError> {
    let base_url = required_string(mediawiki.base_url, "mediawiki.base_url")?;
    Url::parse(&base_url).map_err(|err| {
        LoadError::invalid("mediawiki.base_url", format!("invalid URL: {err}"))
    })?;
    Ok(MediaWikiSettings { base_url })
}

fn build_redis_settings(redis: RawRedisSettings) -> Result<RedisSettings, LoadError> {
    Ok(RedisSettings {
        addr: required_string(redis.addr, "redis.addr")?,
        password: redis.password.unwrap_or_default(),
        db: redis.db.unwrap_or(0),
    })
}

fn build_s3_settings(s3: RawS3Settings) -> Result<S3Settings, LoadError> {
    Ok(S3Settings {
        endpoint: required_string(s3.endpoint, "s3.endpoint")?,
        region: s3.region.unwrap_or_else(|| DEFAULT_S3_REGION.to_string()),
        bucket: required_string(s3.bucket, "s3.bucket")?,
        access_key: required_string(s3.access_key, "s3.access_key")?,
        secret_key: required_string(s3.secret_key, "s3.secret_key")?,
    })
}

fn build_purge_settings(purge: RawPurgeSettings) -> Result<PurgeSettings, LoadError> {
    let nginx_purge_url = purge.nginx_purge_url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    if let Some(url) = nginx_purge_url.as_ref() {
        Url::parse(url).map_err(|err| {
            LoadError::invalid("purge.nginx_purge_url", format!("invalid URL: {err}"))
        })?;
    }
    Ok(PurgeSettings { nginx_purge_url })
}

fn build_auth_settings(auth: RawAuthSettings) -> AuthSettings {
    AuthSettings {
        logged_in_cookie: auth
            .logged_in_cookie
            .unwrap_or_else(|| DEFAULT_LOGGED_IN_COOKIE.to_string()),
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> CacheSettings {
    CacheSettings {
        ttl_seconds: cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECONDS),
    }
}

fn build_lock_settings(lock: RawLockSettings) -> Result<LockSettings, LoadError> {
    let ttl_seconds = lock.ttl_seconds.unwrap_or(DEFAULT_LOCK_TTL_SECONDS);
    if ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "lock.ttl_seconds",
            "must be greater than zero",
        ));
    }
    let max_wait_seconds = lock
        .max_wait_seconds
        .unwrap_or(DEFAULT_MAX_LOCK_WAIT_SECONDS);

    Ok(LockSettings {
        ttl: Duration::from_secs(ttl_seconds),
        max_wait: Duration::from_secs(max_wait_seconds),
    })
}

fn required_string(value: Option<String>, key: &'static str) -> Result<String, LoadError> {
    value
        .and_then(|value| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .ok_or_else(|| LoadError::invalid(key, "value is required"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    listen_addr: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMediaWikiSettings {
    base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    addr: Option<String>,
    password: Option<String>,
    db: Option<u8>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawS3Settings {
    endpoint: Option<String>,
    region: Option<String>,
    bucket: Option<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPurgeSettings {
    nginx_purge_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    logged_in_cookie: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    ttl_seconds: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLockSettings {
    ttl_seconds: Option<u64>,
    max_wait_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_raw() -> RawSettings {
        let mut raw = RawSettings::default();
        raw.mediawiki.base_url = Some("http://wiki.internal".to_string());
        raw.redis.addr = Some("127.0.0.1:6379".to_string());
        raw.s3.endpoint = Some("http://127.0.0.1:9000".to_string());
        raw.s3.bucket = Some("pages".to_string());
        raw.s3.access_key = Some("access".to_string());
        raw.s3.secret_key = Some("secret".to_string());
        raw
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = Settings::from_raw(minimal_raw()).expect("valid settings");

        assert_eq!(settings.server.listen_addr.port(), 8080);
        assert_eq!(settings.auth.logged_in_cookie, "52poke_wikiUserID");
        assert_eq!(settings.cache.ttl_seconds, 2_592_000);
        assert_eq!(settings.lock.ttl, Duration::from_secs(45));
        assert_eq!(settings.lock.max_wait, Duration::from_secs(3));
        assert!(settings.purge.nginx_purge_url.is_none());
        assert_eq!(settings.s3.region, "us-east-1");
    }

    #[test]
    fn mediawiki_base_url_is_required() {
        let mut raw = minimal_raw();
        raw.mediawiki.base_url = None;
        let err = Settings::from_raw(raw).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "mediawiki.base_url",
                ..
            }
        ));
    }

    #[test]
    fn s3_credentials_are_required() {
        let mut raw = minimal_raw();
        raw.s3.secret_key = Some("   ".to_string());
        let err = Settings::from_raw(raw).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "s3.secret_key",
                ..
            }
        ));
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = minimal_raw();
        raw.server.listen_addr = Some("127.0.0.1:3000".to_string());
        raw.logging.level = Some("info".to_string());

        let overrides = ServeOverrides {
            listen_addr: Some("127.0.0.1:4321".to_string()),
            log_level: Some("debug".to_string()),
            cache_ttl_seconds: Some(60),
            ..Default::default()
        };
        raw.apply_serve_overrides(&overrides);

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.server.listen_addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.cache.ttl_seconds, 60);
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = minimal_raw();
        let overrides = ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        };
        raw.apply_serve_overrides(&overrides);

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn redis_url_renders_password_and_db() {
        let plain = RedisSettings {
            addr: "127.0.0.1:6379".to_string(),
            password: String::new(),
            db: 0,
        };
        assert_eq!(plain.url(), "redis://127.0.0.1:6379/0");

        let authed = RedisSettings {
            addr: "redis.internal:6379".to_string(),
            password: "hunter2".to_string(),
            db: 3,
        };
        assert_eq!(authed.url(), "redis://:hunter2@redis.internal:6379/3");
    }

    #[test]
    fn zero_lock_ttl_is_rejected() {
        let mut raw = minimal_raw();
        raw.lock.ttl_seconds = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn invalid_listen_addr_is_rejected() {
        let mut raw = minimal_raw();
        raw.server.listen_addr = Some(":8080".to_string());
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn parse_serve_overrides() {
        let args = CliArgs::parse_from([
            "inazuma",
            "serve",
            "--listen-addr",
            "0.0.0.0:9090",
            "--mediawiki-base-url",
            "http://wiki.example",
            "--lock-ttl-seconds",
            "10",
        ]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.overrides.listen_addr.as_deref(), Some("0.0.0.0:9090"));
                assert_eq!(
                    serve.overrides.mediawiki_base_url.as_deref(),
                    Some("http://wiki.example")
                );
                assert_eq!(serve.overrides.lock_ttl_seconds, Some(10));
            }
        }
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["inazuma"]);
        assert!(args.command.is_none());
    }
}
