// ABOUTME: RecordPipeline sequences Store, Cache, and Notifier calls for each user operation.
// ABOUTME: Store commits come first; cache invalidation follows; events are published last and best-effort.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use ulid::Ulid;

use crate::cache::Cache;
use crate::event::{DEFAULT_TOPIC, EventKind, UserEvent};
use crate::invalidation::InvalidationTracker;
use crate::model::{NewUser, Record, UserPatch};
use crate::notifier::Notifier;
use crate::store::{Store, StoreError};

/// Outcomes a pipeline operation can report to its caller.
/// Cache and notifier failures never appear here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("user not found: {0}")]
    NotFound(Ulid),

    #[error("user already exists: {0}")]
    Conflict(Ulid),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store unavailable: {0}")]
    Transient(String),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => PipelineError::NotFound(id),
            StoreError::Conflict(id) => PipelineError::Conflict(id),
            StoreError::Unavailable(reason) => PipelineError::Transient(reason),
        }
    }
}

/// Orchestrates the three collaborators for every user operation.
///
/// Holds no per-operation state; concurrent calls are independent. The only
/// shared bookkeeping is the [`InvalidationTracker`], which never blocks on
/// Store or Cache I/O.
pub struct RecordPipeline {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    notifier: Arc<dyn Notifier>,
    topic: String,
    cache_ttl: Option<Duration>,
    invalidation: InvalidationTracker,
}

impl RecordPipeline {
    /// Build a pipeline publishing to the default topic with unbounded cache TTL.
    pub fn new(store: Arc<dyn Store>, cache: Arc<dyn Cache>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            cache,
            notifier,
            topic: DEFAULT_TOPIC.to_string(),
            cache_ttl: None,
            invalidation: InvalidationTracker::new(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn invalidation(&self) -> &InvalidationTracker {
        &self.invalidation
    }

    /// Create a user: assign an id, write it durably, then publish `created`.
    /// The cache is left alone; the first read fills it.
    pub async fn create(&self, input: NewUser) -> Result<Record, PipelineError> {
        input.validate().map_err(PipelineError::InvalidInput)?;

        let record = Record::new(input.name, input.email);
        self.store.put(&record).await.inspect_err(|e| {
            tracing::error!("failed to store new user {}: {}", record.id, e);
        })?;
        tracing::info!("created user {}", record.id);

        self.publish(EventKind::Created, &record).await;
        Ok(record)
    }

    /// Read-through lookup. A cache hit is returned as is; on a miss the Store
    /// is consulted and the cache filled only after the Store confirms the record.
    pub async fn read(&self, id: Ulid) -> Result<Record, PipelineError> {
        if self.invalidation.is_pending(id) {
            tracing::debug!("cache entry for {} may be stale, bypassing", id);
        } else {
            match self.cache.get(id).await {
                Ok(Some(record)) if record.id == id => {
                    tracing::debug!("cache hit for {}", id);
                    return Ok(record);
                }
                Ok(Some(other)) => {
                    tracing::warn!("cache entry for {} holds record {}, ignoring", id, other.id);
                }
                Ok(None) => tracing::debug!("cache miss for {}", id),
                Err(e) => tracing::warn!("cache read failed for {}, falling back to store: {}", id, e),
            }
        }

        let observed = self.invalidation.epoch();
        let record = match self.store.get(id).await {
            Ok(record) => record,
            Err(StoreError::NotFound(id)) => {
                if self.invalidation.is_pending(id) {
                    self.invalidate(id).await;
                }
                return Err(PipelineError::NotFound(id));
            }
            Err(e) => {
                tracing::error!("failed to read user {}: {}", id, e);
                return Err(e.into());
            }
        };

        self.fill(&record, observed).await;
        Ok(record)
    }

    /// Apply a patch durably, then drop the cached entry and publish `updated`.
    pub async fn update(&self, id: Ulid, patch: UserPatch) -> Result<Record, PipelineError> {
        patch.validate().map_err(PipelineError::InvalidInput)?;

        let record = self.store.update(id, &patch).await.inspect_err(|e| {
            log_write_failure("update", id, e);
        })?;
        self.after_commit(id).await;
        tracing::info!("updated user {}", id);

        self.publish(EventKind::Updated, &record).await;
        Ok(record)
    }

    /// Remove the record durably, then drop the cached entry and publish `deleted`.
    pub async fn delete(&self, id: Ulid) -> Result<Record, PipelineError> {
        let record = self.store.delete(id).await.inspect_err(|e| {
            log_write_failure("delete", id, e);
        })?;
        self.after_commit(id).await;
        tracing::info!("deleted user {}", id);

        self.publish(EventKind::Deleted, &record).await;
        Ok(record)
    }

    /// Soft-delete: flip `active` to false, keeping the row.
    pub async fn deactivate(&self, id: Ulid) -> Result<Record, PipelineError> {
        let record = self.store.set_active(id, false).await.inspect_err(|e| {
            log_write_failure("deactivate", id, e);
        })?;
        self.after_commit(id).await;
        tracing::info!("deactivated user {}", id);

        self.publish(EventKind::Deactivated, &record).await;
        Ok(record)
    }

    /// List every record straight from the Store. The cache is not consulted.
    pub async fn list(&self) -> Result<Vec<Record>, PipelineError> {
        self.store.list_all().await.map_err(|e| {
            tracing::error!("failed to list users: {}", e);
            e.into()
        })
    }

    async fn after_commit(&self, id: Ulid) {
        self.invalidation.record_write();
        self.invalidate(id).await;
    }

    /// Drop the cache entry. On failure the id is marked pending so the next
    /// read refreshes it; the caller still sees success.
    async fn invalidate(&self, id: Ulid) {
        match self.cache.invalidate(id).await {
            Ok(()) => {
                self.invalidation.clear(id);
            }
            Err(e) => {
                tracing::warn!("cache invalidation failed for {}, next read will refresh: {}", id, e);
                self.invalidation.mark_pending(id);
            }
        }
    }

    /// Cache a record read from the Store at write epoch `observed`.
    ///
    /// The entry is written before the epoch is checked, so when a write
    /// committed mid-read another reader can briefly hit the superseded value
    /// until the invalidation below lands. This window is accepted; do not
    /// close it with a lock spanning Store and Cache calls.
    async fn fill(&self, record: &Record, observed: u64) {
        let id = record.id;
        if let Err(e) = self.cache.set(id, record, self.cache_ttl).await {
            tracing::warn!("cache fill failed for {}: {}", id, e);
            return;
        }

        if self.invalidation.moved_since(observed) {
            // A write committed while this read was in flight.
            tracing::debug!("dropping cache fill for {} after concurrent write", id);
            self.invalidate(id).await;
        } else if self.invalidation.clear(id) {
            tracing::debug!("refreshed stale cache entry for {}", id);
        }
    }

    async fn publish(&self, kind: EventKind, record: &Record) {
        let event = UserEvent::new(kind, record.clone());
        if let Err(e) = self.notifier.publish(&self.topic, &event).await {
            tracing::warn!("failed to publish {} event for {}: {}", kind.as_str(), record.id, e);
        }
    }
}

fn log_write_failure(op: &str, id: Ulid, err: &StoreError) {
    match err {
        StoreError::NotFound(_) => tracing::debug!("{} declined, user {} not found", op, id),
        other => tracing::error!("{} failed for user {}: {}", op, id, other),
    }
}
