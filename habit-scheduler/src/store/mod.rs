//! Durable snapshot storage for the task registry.
//!
//! The store itself is a dumb key-value blob holder behind the [`SnapshotStore`] trait.
//! [`PersistenceGateway`] owns the key and the (de)serialization of the registry.

use crate::task::{SharedRegistry, TaskRegistry};
use async_trait::async_trait;
use mockall::automock;
use std::sync::Arc;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors raised by a key-value store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Store worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Last-write-wins key-value storage for opaque blobs.
#[automock]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Reads the blob stored under `key`, or `None` if nothing was ever written.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replaces whatever is stored under `key` with `value`.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
}

/// Errors raised while loading or saving the registry snapshot.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Snapshot store failed: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to encode registry snapshot: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Failed to decode registry snapshot: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Loads the registry at startup and overwrites its snapshot on every save.
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn SnapshotStore>,
    key: String,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn SnapshotStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Reads the snapshot. A missing or empty record is an empty registry.
    #[tracing::instrument(skip(self), fields(key = %self.key))]
    pub async fn load(&self) -> Result<TaskRegistry, PersistenceError> {
        let registry = match self.store.get(&self.key).await? {
            Some(bytes) if !bytes.is_empty() => {
                TaskRegistry::from_snapshot(&bytes).map_err(PersistenceError::Decode)?
            }
            _ => {
                tracing::info!("No snapshot stored yet, starting with an empty registry");
                TaskRegistry::new()
            }
        };
        tracing::info!("Loaded {} tasks", registry.len());
        Ok(registry)
    }

    /// Serializes the registry as it is right now and replaces the stored snapshot.
    ///
    /// The registry lock is released before the store is written to.
    ///
    /// # Returns
    ///
    /// The number of tasks written.
    #[tracing::instrument(skip(self, registry), fields(key = %self.key))]
    pub async fn save(&self, registry: &SharedRegistry) -> Result<usize, PersistenceError> {
        let (bytes, count) = {
            let registry = registry.lock().await;
            let bytes = registry.to_snapshot().map_err(PersistenceError::Encode)?;
            (bytes, registry.len())
        };
        self.store.set(&self.key, bytes).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::NewTask;
    use chrono::Utc;
    use mockall::predicate::*;

    #[tokio::test]
    async fn missing_record_loads_empty_registry() {
        let mut store = MockSnapshotStore::new();
        store
            .expect_get()
            .with(eq("tasks"))
            .times(1)
            .returning(|_| Ok(None));

        let gateway = PersistenceGateway::new(Arc::new(store), "tasks");

        assert!(gateway.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_record_fails_to_load() {
        let mut store = MockSnapshotStore::new();
        store
            .expect_get()
            .returning(|_| Ok(Some(b"{\"tasks\": 12}".to_vec())));

        let gateway = PersistenceGateway::new(Arc::new(store), "tasks");

        assert!(matches!(
            gateway.load().await,
            Err(PersistenceError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_store_fails_to_load() {
        let mut store = MockSnapshotStore::new();
        store
            .expect_get()
            .returning(|_| Err(StoreError::Unavailable("connection refused".to_string())));

        let gateway = PersistenceGateway::new(Arc::new(store), "tasks");

        assert!(matches!(
            gateway.load().await,
            Err(PersistenceError::Store(_))
        ));
    }

    #[tokio::test]
    async fn save_writes_full_snapshot_under_key() {
        let mut registry = TaskRegistry::new();
        registry
            .create_task(NewTask::every_hours("Laundry", 72), Utc::now())
            .unwrap();
        let expected = registry.to_snapshot().unwrap();
        let shared = registry.into_shared();

        let mut store = MockSnapshotStore::new();
        store
            .expect_set()
            .withf(move |key, value| key == "tasks" && *value == expected)
            .times(1)
            .returning(|_, _| Ok(()));

        let gateway = PersistenceGateway::new(Arc::new(store), "tasks");

        assert_eq!(gateway.save(&shared).await.unwrap(), 1);
    }
}
