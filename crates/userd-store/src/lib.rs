// ABOUTME: Persistence adapters for userd: the SQLite record store and the JSONL event log.
// ABOUTME: With the `redis` feature, also a Redis-backed implementation of the cache contract.

pub mod jsonl;
#[cfg(feature = "redis")]
pub mod redis_cache;
pub mod sqlite;

pub use jsonl::{JsonlError, JsonlEventLog, JsonlNotifier, LogEntry};
#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;
pub use sqlite::{SqliteStore, SqliteStoreError};
