//! Durable key-value store with a synced and a local tier.
//!
//! The synced tier holds small values (token, watermark, preferences); the
//! local tier holds larger or process-scoped values (id mappings, run markers).

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::database::connection::Database;
use crate::types::errors::StorageError;

/// Storage tier of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageTier {
    Synced,
    Local,
}

impl StorageTier {
    fn as_str(self) -> &'static str {
        match self {
            StorageTier::Synced => "synced",
            StorageTier::Local => "local",
        }
    }
}

/// Asynchronous get/set/remove by key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, tier: StorageTier, key: &str) -> Result<Option<Value>, StorageError>;
    async fn set(&self, tier: StorageTier, key: &str, value: Value) -> Result<(), StorageError>;
    async fn remove(&self, tier: StorageTier, keys: &[&str]) -> Result<(), StorageError>;
}

/// Key-value store kept in the `kv_store` table, one JSON text value per row.
pub struct SqliteKvStore {
    db: Arc<Database>,
}

impl SqliteKvStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn db_err(e: rusqlite::Error) -> StorageError {
    StorageError::DatabaseError(e.to_string())
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get(&self, tier: StorageTier, key: &str) -> Result<Option<Value>, StorageError> {
        let raw: Option<String> = self
            .db
            .connection()
            .query_row(
                "SELECT value FROM kv_store WHERE tier = ?1 AND key = ?2",
                params![tier.as_str(), key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        match raw {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| StorageError::SerializationError(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }

    async fn set(&self, tier: StorageTier, key: &str, value: Value) -> Result<(), StorageError> {
        let text = serde_json::to_string(&value)
            .map_err(|e| StorageError::SerializationError(format!("{}: {}", key, e)))?;
        let now = chrono::Utc::now().timestamp();

        self.db
            .connection()
            .execute(
                "INSERT OR REPLACE INTO kv_store (tier, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![tier.as_str(), key, text, now],
            )
            .map_err(db_err)?;
        Ok(())
    }

    async fn remove(&self, tier: StorageTier, keys: &[&str]) -> Result<(), StorageError> {
        let conn = self.db.connection();
        for key in keys {
            conn.execute(
                "DELETE FROM kv_store WHERE tier = ?1 AND key = ?2",
                params![tier.as_str(), key],
            )
            .map_err(db_err)?;
        }
        Ok(())
    }
}
