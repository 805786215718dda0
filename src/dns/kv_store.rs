//! Key-Value Persistence Backends
//!
//! The key store only needs get/set/delete/list over opaque bytes. Two
//! backends are provided: an in-memory map and SQLite.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{Mutex, RwLock};

use super::dnssec_keys::KeyError;

/// Generic key-value backend
#[async_trait]
pub trait KvStore: Send + Sync {
    /// `Ok(None)` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or overwrite
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove a key; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, ordered by key
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}

/// In-memory backend
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// SQLite backend, single `kv` table
pub struct SqliteKvStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKvStore {
    /// Open (or create) a database file
    pub fn new(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)
            .map_err(|e| StoreError::Backend(format!("Failed to open database {}: {}", db_path, e)))?;
        Self::from_connection(conn)
    }

    /// Create an in-memory database (useful for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Backend(format!("Failed to open in-memory database: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| StoreError::Backend(format!("Failed to create kv table: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .map_err(|e| StoreError::Backend(format!("Failed to read {}: {}", key, e)))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| StoreError::Backend(format!("Failed to write {}: {}", key, e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|e| StoreError::Backend(format!("Failed to delete {}: {}", key, e)))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT key, value FROM kv
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )
            .map_err(|e| StoreError::Backend(format!("Failed to prepare list query: {}", e)))?;

        let rows = stmt
            .query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| StoreError::Backend(format!("Failed to list {}: {}", prefix, e)))?;

        rows.collect::<Result<Vec<(String, Vec<u8>)>, _>>()
            .map_err(|e| StoreError::Backend(format!("Failed to read row: {}", e)))
    }
}

/// Persistence errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key error: {0}")]
    Key(#[from] KeyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(store: &dyn KvStore) {
        assert_eq!(store.get("dnssec/example.com").await.unwrap(), None);

        store.set("dnssec/example.com", b"one").await.unwrap();
        store.set("dnssec/example.org", b"two").await.unwrap();
        store.set("other/key", b"three").await.unwrap();
        store.set("dnssec/example.com", b"uno").await.unwrap();

        assert_eq!(store.get("dnssec/example.com").await.unwrap(), Some(b"uno".to_vec()));

        let listed = store.list("dnssec/").await.unwrap();
        assert_eq!(
            listed,
            vec![
                ("dnssec/example.com".to_string(), b"uno".to_vec()),
                ("dnssec/example.org".to_string(), b"two".to_vec()),
            ]
        );

        store.delete("dnssec/example.com").await.unwrap();
        store.delete("dnssec/example.com").await.unwrap();
        assert_eq!(store.get("dnssec/example.com").await.unwrap(), None);
        assert_eq!(store.list("dnssec/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryKvStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_in_memory_store() {
        exercise(&SqliteKvStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_sqlite_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteKvStore::new(path).unwrap();
            store.set("dnssec/example.com", b"persisted").await.unwrap();
        }

        let reopened = SqliteKvStore::new(path).unwrap();
        assert_eq!(
            reopened.get("dnssec/example.com").await.unwrap(),
            Some(b"persisted".to_vec())
        );
    }

    #[tokio::test]
    async fn test_prefix_with_like_metacharacters() {
        let store = SqliteKvStore::in_memory().unwrap();
        store.set("a_b/1", b"x").await.unwrap();
        store.set("axb/1", b"y").await.unwrap();
        assert_eq!(store.list("a_b/").await.unwrap().len(), 1);
    }
}
