// ABOUTME: The Cache contract for the volatile read-through lookup, plus an in-memory implementation.
// ABOUTME: A miss is Ok(None); invalidation of an absent key succeeds silently.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::Record;

/// Errors a Cache can report. Callers treat every cache error as non-fatal.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Volatile key/value shadow of the Store, keyed by record id.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, id: Ulid) -> Result<Option<Record>, CacheError>;

    /// Store a record. `ttl = None` keeps the entry until it is invalidated.
    async fn set(&self, id: Ulid, record: &Record, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Drop the entry for `id`. Idempotent.
    async fn invalidate(&self, id: Ulid) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    record: Record,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local cache. Expired entries are dropped lazily on read.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<Ulid, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, including any not yet expired lazily.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, id: Ulid) -> Result<Option<Record>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(&id) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.record.clone())),
                Some(_) => {}
            }
        }

        // Re-check under the write lock; a concurrent set may have replaced it.
        let mut entries = self.entries.write().await;
        if entries.get(&id).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(&id);
        }
        Ok(entries
            .get(&id)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.record.clone()))
    }

    async fn set(&self, id: Ulid, record: &Record, ttl: Option<Duration>) -> Result<(), CacheError> {
        let entry = CacheEntry {
            record: record.clone(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.write().await.insert(id, entry);
        Ok(())
    }

    async fn invalidate(&self, id: Ulid) -> Result<(), CacheError> {
        self.entries.write().await.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record() -> Record {
        Record::new("A".to_string(), "a@x.com".to_string())
    }

    #[tokio::test]
    async fn miss_is_not_an_error() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get(Ulid::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get_hits() {
        let cache = MemoryCache::new();
        let record = make_record();

        cache.set(record.id, &record, None).await.unwrap();

        assert_eq!(cache.get(record.id).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() {
        let cache = MemoryCache::new();
        let record = make_record();
        cache.set(record.id, &record, None).await.unwrap();

        cache.invalidate(record.id).await.unwrap();
        cache.invalidate(record.id).await.unwrap();
        cache.invalidate(Ulid::new()).await.unwrap();

        assert_eq!(cache.get(record.id).await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let cache = MemoryCache::new();
        let record = make_record();

        cache
            .set(record.id, &record, Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(cache.get(record.id).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.get(record.id).await.unwrap(), None);
        assert_eq!(cache.len().await, 0);
    }
}
