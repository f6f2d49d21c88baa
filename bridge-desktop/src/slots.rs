//! Slot storage: in-process map and SQLite-backed shared file

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SlotStore,
};
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqlitePool, Row};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::debug;

/// Slot store living in process memory.
///
/// Suitable when both the requester and the responder run in the same
/// process (e.g. two runtimes or a runtime and a UI thread).
#[derive(Debug, Default)]
pub struct InMemorySlotStore {
    slots: RwLock<HashMap<String, String>>,
}

impl InMemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots currently holding a value
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}

#[async_trait]
impl SlotStore for InMemorySlotStore {
    async fn read(&self, key: &str) -> Result<String> {
        Ok(self.slots.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.slots
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.slots.write().await.remove(key);
        Ok(())
    }
}

/// SQLite-backed slot store
///
/// Two processes opening the same database file see the same slots, which
/// makes this the desktop stand-in for a host-global property table.
pub struct SqliteSlotStore {
    pool: SqlitePool,
}

impl SqliteSlotStore {
    /// Open (or create) a slot store at the given database path
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        // Forward slashes keep the SQLite URL valid on Windows paths too
        let path_str = db_path.to_string_lossy().replace('\\', "/");
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path_str))
            .map_err(|e| BridgeError::DatabaseError(format!("Invalid database path: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to connect to DB: {}", e)))?;

        Self::create_table(&pool).await?;

        debug!(path = ?db_path, "Initialized slot store");

        Ok(Self { pool })
    }

    /// Create an in-memory slot store (for testing)
    pub async fn in_memory() -> Result<Self> {
        // A single connection keeps every query on the same in-memory database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to connect to DB: {}", e)))?;

        Self::create_table(&pool).await?;

        Ok(Self { pool })
    }

    async fn create_table(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS slots (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| BridgeError::DatabaseError(format!("Failed to create table: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl SlotStore for SqliteSlotStore {
    async fn read(&self, key: &str) -> Result<String> {
        let row = sqlx::query("SELECT value FROM slots WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to read slot: {}", e)))?;

        Ok(row.map(|row| row.get::<String, _>(0)).unwrap_or_default())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO slots (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| BridgeError::DatabaseError(format!("Failed to write slot: {}", e)))?;

        debug!(key = key, "Stored slot");
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM slots WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to clear slot: {}", e)))?;

        debug!(key = key, "Cleared slot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_absent_slot_reads_empty() {
        let store = InMemorySlotStore::new();
        assert_eq!(store.read("missing").await.unwrap(), "");
        assert!(!store.is_filled("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_write_then_clear() {
        let store = InMemorySlotStore::new();

        store.write("sync_bridge_a.json", "{}").await.unwrap();
        assert_eq!(store.read("sync_bridge_a.json").await.unwrap(), "{}");
        assert_eq!(store.len().await, 1);

        store.clear("sync_bridge_a.json").await.unwrap();
        assert_eq!(store.read("sync_bridge_a.json").await.unwrap(), "");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sqlite_slot_round_trip() {
        let store = SqliteSlotStore::in_memory().await.unwrap();

        assert_eq!(store.read("k").await.unwrap(), "");

        store.write("k", "first").await.unwrap();
        store.write("k", "second").await.unwrap();
        assert_eq!(store.read("k").await.unwrap(), "second");

        store.clear("k").await.unwrap();
        assert_eq!(store.read("k").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_sqlite_slots_shared_through_file() {
        let path = std::env::temp_dir()
            .join(format!("slot-store-test-{}", uuid::Uuid::new_v4()))
            .join("slots.db");

        let writer = SqliteSlotStore::new(path.clone()).await.unwrap();
        let reader = SqliteSlotStore::new(path.clone()).await.unwrap();

        writer.write("shared", "hello").await.unwrap();
        assert_eq!(reader.read("shared").await.unwrap(), "hello");

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
