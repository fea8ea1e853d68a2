// ABOUTME: The Store contract for the durable record table, plus an in-memory implementation.
// ABOUTME: Store is the sole source of truth; every operation is atomic per record.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::{Record, UserPatch};

/// Errors a Store can report. `NotFound` and `Conflict` are expected outcomes;
/// `Unavailable` covers transport and backend failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(Ulid),

    #[error("record already exists: {0}")]
    Conflict(Ulid),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable keyed record table.
///
/// `update`, `delete` and `set_active` never succeed silently on a missing id;
/// they return `NotFound`. Each returns the record as it stands after the
/// write (for `delete`, the record that was removed).
#[async_trait]
pub trait Store: Send + Sync {
    async fn put(&self, record: &Record) -> Result<(), StoreError>;

    async fn get(&self, id: Ulid) -> Result<Record, StoreError>;

    async fn update(&self, id: Ulid, patch: &UserPatch) -> Result<Record, StoreError>;

    async fn delete(&self, id: Ulid) -> Result<Record, StoreError>;

    async fn set_active(&self, id: Ulid, active: bool) -> Result<Record, StoreError>;

    /// All records ordered by id (ULIDs sort by creation time).
    async fn list_all(&self) -> Result<Vec<Record>, StoreError>;
}

/// A Store held entirely in memory. Used by tests and `USERD_STORE=memory`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<Ulid, Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, record: &Record) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::Conflict(record.id));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Ulid) -> Result<Record, StoreError> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update(&self, id: Ulid, patch: &UserPatch) -> Result<Record, StoreError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.apply(patch);
        Ok(record.clone())
    }

    async fn delete(&self, id: Ulid) -> Result<Record, StoreError> {
        self.records
            .write()
            .await
            .remove(&id)
            .ok_or(StoreError::NotFound(id))
    }

    async fn set_active(&self, id: Ulid, active: bool) -> Result<Record, StoreError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.active = active;
        Ok(record.clone())
    }

    async fn list_all(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(name: &str) -> Record {
        Record::new(name.to_string(), format!("{}@x.com", name.to_lowercase()))
    }

    #[tokio::test]
    async fn put_rejects_duplicate_id() {
        let store = MemoryStore::new();
        let record = make_record("A");

        store.put(&record).await.unwrap();
        let err = store.put(&record).await.unwrap_err();

        assert!(matches!(err, StoreError::Conflict(id) if id == record.id));
    }

    #[tokio::test]
    async fn writes_on_missing_id_report_not_found() {
        let store = MemoryStore::new();
        let id = Ulid::new();

        assert!(matches!(store.get(id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.update(id, &UserPatch::default()).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(store.delete(id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.set_active(id, false).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let store = MemoryStore::new();
        let record = make_record("A");
        store.put(&record).await.unwrap();

        let updated = store
            .update(
                record.id,
                &UserPatch {
                    name: Some("Alice".to_string()),
                    email: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Alice");
        assert_eq!(updated.email, record.email);

        let deactivated = store.set_active(record.id, false).await.unwrap();
        assert!(!deactivated.active);
        assert_eq!(store.list_all().await.unwrap().len(), 1);

        let removed = store.delete(record.id).await.unwrap();
        assert_eq!(removed.name, "Alice");
        assert!(store.list_all().await.unwrap().is_empty());
    }
}
