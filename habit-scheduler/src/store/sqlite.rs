use super::{SnapshotStore, StoreError};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Durable store keeping each key as one row of a SQLite `kv` table.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `op` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection mutex poisoned".to_string()))?;
            op(&*conn).map_err(StoreError::from)
        })
        .await?
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", [&key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()
        })
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map(|_| ())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_key_reads_as_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_overwrites_previous_value() {
        let store = SqliteStore::open_in_memory().unwrap();

        store.set("tasks", b"first".to_vec()).await.unwrap();
        store.set("tasks", b"second".to_vec()).await.unwrap();
        store.set("other", b"untouched".to_vec()).await.unwrap();

        assert_eq!(store.get("tasks").await.unwrap(), Some(b"second".to_vec()));
        assert_eq!(store.get("other").await.unwrap(), Some(b"untouched".to_vec()));
    }
}
