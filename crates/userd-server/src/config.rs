// ABOUTME: Configuration loading and validation for the userd server.
// ABOUTME: Reads USERD_* environment variables and derives the on-disk layout under the home directory.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use userd_core::DEFAULT_TOPIC;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("USERD_BIND is not a valid socket address: {0}")]
    InvalidBind(String),

    #[error("USERD_STORE must be 'sqlite' or 'memory', got {0:?}")]
    InvalidStore(String),

    #[error("USERD_CACHE_TTL_SECS must be a positive integer, got {0:?}")]
    InvalidCacheTtl(String),

    #[error("USERD_EVENT_TOPIC must not be empty")]
    EmptyTopic,

    #[error("USERD_REDIS_URL is set but userd was built without the `redis` feature")]
    RedisUnsupported,
}

/// Which Store backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Memory,
}

impl FromStr for StoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreKind::Sqlite),
            "memory" => Ok(StoreKind::Memory),
            _ => Err(ConfigError::InvalidStore(s.to_string())),
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct UserdConfig {
    pub home: PathBuf,
    pub bind: SocketAddr,
    pub store: StoreKind,
    pub redis_url: Option<String>,
    pub cache_ttl: Option<Duration>,
    pub topic: String,
}

impl UserdConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - USERD_HOME: data directory (default: ~/.userd)
    /// - USERD_BIND: socket address to bind (default: 127.0.0.1:8080)
    /// - USERD_STORE: `sqlite` or `memory` (default: sqlite)
    /// - USERD_REDIS_URL: Redis cache URL (optional; in-process cache otherwise)
    /// - USERD_CACHE_TTL_SECS: bounded cache entry lifetime (optional; unbounded otherwise)
    /// - USERD_EVENT_TOPIC: topic events are published to (default: user-events)
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = std::env::var("USERD_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/tmp"))
                    .join(".userd")
            });

        let bind_str = std::env::var("USERD_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let bind: SocketAddr = bind_str
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind_str))?;

        let store = match std::env::var("USERD_STORE") {
            Ok(s) if !s.trim().is_empty() => s.parse()?,
            _ => StoreKind::Sqlite,
        };

        let redis_url = std::env::var("USERD_REDIS_URL").ok().filter(|u| !u.is_empty());
        if redis_url.is_some() && !cfg!(feature = "redis") {
            return Err(ConfigError::RedisUnsupported);
        }

        let cache_ttl = match std::env::var("USERD_CACHE_TTL_SECS") {
            Ok(s) if !s.trim().is_empty() => Some(parse_ttl(&s)?),
            _ => None,
        };

        let topic = std::env::var("USERD_EVENT_TOPIC").unwrap_or_else(|_| DEFAULT_TOPIC.to_string());
        if topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic);
        }

        Ok(Self {
            home,
            bind,
            store,
            redis_url,
            cache_ttl,
            topic,
        })
    }

    /// A config rooted at `home` with every other setting at its default.
    pub fn with_home(home: PathBuf) -> Self {
        Self {
            home,
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            store: StoreKind::Sqlite,
            redis_url: None,
            cache_ttl: None,
            topic: DEFAULT_TOPIC.to_string(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.home.join("users.db")
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.home.join("events.jsonl")
    }

    pub fn counter_path(&self) -> PathBuf {
        self.home.join("counter.txt")
    }
}

fn parse_ttl(raw: &str) -> Result<Duration, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidCacheTtl(raw.to_string())),
    }
}
