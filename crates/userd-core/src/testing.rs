// ABOUTME: Test doubles for userd collaborators: switchable-failure and pausable stores, a flaky cache, and recording notifiers.
// ABOUTME: Used to drive the pipeline through outage paths without real backends.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use ulid::Ulid;

use crate::cache::{Cache, CacheError, MemoryCache};
use crate::event::UserEvent;
use crate::model::{Record, UserPatch};
use crate::notifier::{Notifier, NotifyError, TopicEvent};
use crate::store::{MemoryStore, Store, StoreError};

/// Wraps a Store and returns `Unavailable` from every call while failing.
#[derive(Debug, Default)]
pub struct FlakyStore<S = MemoryStore> {
    inner: S,
    failing: AtomicBool,
}

impl<S: Store> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The wrapped store, bypassing failure injection.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected store failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Store> Store for FlakyStore<S> {
    async fn put(&self, record: &Record) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(record).await
    }

    async fn get(&self, id: Ulid) -> Result<Record, StoreError> {
        self.check()?;
        self.inner.get(id).await
    }

    async fn update(&self, id: Ulid, patch: &UserPatch) -> Result<Record, StoreError> {
        self.check()?;
        self.inner.update(id, patch).await
    }

    async fn delete(&self, id: Ulid) -> Result<Record, StoreError> {
        self.check()?;
        self.inner.delete(id).await
    }

    async fn set_active(&self, id: Ulid, active: bool) -> Result<Record, StoreError> {
        self.check()?;
        self.inner.set_active(id, active).await
    }

    async fn list_all(&self) -> Result<Vec<Record>, StoreError> {
        self.check()?;
        self.inner.list_all().await
    }
}

/// Wraps a Store and, once armed, parks the next `get` after it has read
/// from the inner store until [`GatedStore::release`] is called.
#[derive(Debug, Default)]
pub struct GatedStore<S = MemoryStore> {
    inner: S,
    armed: AtomicBool,
    parked: Notify,
    released: Notify,
}

impl<S: Store> GatedStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
            parked: Notify::new(),
            released: Notify::new(),
        }
    }

    /// Park the next `get` once it holds its result.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Wait until an armed `get` is parked.
    pub async fn wait_parked(&self) {
        self.parked.notified().await;
    }

    /// Let the parked `get` return.
    pub fn release(&self) {
        self.released.notify_one();
    }
}

#[async_trait]
impl<S: Store> Store for GatedStore<S> {
    async fn put(&self, record: &Record) -> Result<(), StoreError> {
        self.inner.put(record).await
    }

    async fn get(&self, id: Ulid) -> Result<Record, StoreError> {
        let result = self.inner.get(id).await;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.parked.notify_one();
            self.released.notified().await;
        }
        result
    }

    async fn update(&self, id: Ulid, patch: &UserPatch) -> Result<Record, StoreError> {
        self.inner.update(id, patch).await
    }

    async fn delete(&self, id: Ulid) -> Result<Record, StoreError> {
        self.inner.delete(id).await
    }

    async fn set_active(&self, id: Ulid, active: bool) -> Result<Record, StoreError> {
        self.inner.set_active(id, active).await
    }

    async fn list_all(&self) -> Result<Vec<Record>, StoreError> {
        self.inner.list_all().await
    }
}

/// Wraps a MemoryCache, counting calls and failing them on demand.
#[derive(Debug, Default)]
pub struct FlakyCache {
    inner: MemoryCache,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyCache {
    pub fn new(inner: MemoryCache) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Calls made through the Cache trait so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The wrapped cache, bypassing failure injection and call counting.
    pub fn inner(&self) -> &MemoryCache {
        &self.inner
    }

    fn check(&self) -> Result<(), CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("injected cache failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Cache for FlakyCache {
    async fn get(&self, id: Ulid) -> Result<Option<Record>, CacheError> {
        self.check()?;
        self.inner.get(id).await
    }

    async fn set(&self, id: Ulid, record: &Record, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.check()?;
        self.inner.set(id, record, ttl).await
    }

    async fn invalidate(&self, id: Ulid) -> Result<(), CacheError> {
        self.check()?;
        self.inner.invalidate(id).await
    }
}

/// Keeps every published event in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<TopicEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TopicEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, topic: &str, event: &UserEvent) -> Result<(), NotifyError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| NotifyError::Unavailable("recorder lock poisoned".to_string()))?;
        events.push(TopicEvent {
            topic: topic.to_string(),
            event: event.clone(),
        });
        Ok(())
    }
}

/// A notifier whose every publish fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn publish(&self, _topic: &str, _event: &UserEvent) -> Result<(), NotifyError> {
        Err(NotifyError::Unavailable("injected notifier failure".to_string()))
    }
}
