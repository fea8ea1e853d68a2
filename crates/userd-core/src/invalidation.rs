// ABOUTME: Tracks cache invalidations that could not be confirmed, and a write epoch for read-fill races.
// ABOUTME: Lets the read path bypass and refresh entries that may be stale instead of retrying invalidation.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use ulid::Ulid;

/// Bookkeeping that bounds how long a stale cache entry can survive.
///
/// Two mechanisms:
/// - **Pending ids.** When a committed write cannot invalidate its cache entry,
///   the id is marked pending. Reads of a pending id skip the cache, go to the
///   Store, and overwrite the entry. A successful refresh or invalidation
///   clears the mark.
/// - **Write epoch.** Bumped after every committed write. A read that filled
///   the cache while the epoch moved drops its fill, since the value it read
///   may predate that write.
#[derive(Debug, Default)]
pub struct InvalidationTracker {
    pending: Mutex<HashSet<Ulid>>,
    epoch: AtomicU64,
}

impl InvalidationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current write epoch. Read it before consulting the Store.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Record that a durable write committed. Call after the commit and before
    /// invalidating the cache.
    pub fn record_write(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// True if writes committed since `observed` was read.
    pub fn moved_since(&self, observed: u64) -> bool {
        self.epoch() != observed
    }

    /// Mark `id` as possibly stale in the cache.
    pub fn mark_pending(&self, id: Ulid) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id);
        }
    }

    /// Clear the pending mark, returning whether one was set.
    pub fn clear(&self, id: Ulid) -> bool {
        self.pending
            .lock()
            .map(|mut pending| pending.remove(&id))
            .unwrap_or(false)
    }

    pub fn is_pending(&self, id: Ulid) -> bool {
        self.pending
            .lock()
            .map(|pending| pending.contains(&id))
            .unwrap_or(false)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|pending| pending.len()).unwrap_or(0)
    }
}
