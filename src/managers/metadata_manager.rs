//! Typed access to sync metadata and user preferences.
//!
//! Mappings are stored as arrays of `[key, value]` pairs and always rewritten
//! whole. Sync bookkeeping keys carry the `rd-sync-meta_` prefix.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::managers::kv_store::{KeyValueStore, StorageTier};
use crate::types::errors::StorageError;
use crate::types::settings::AutoSyncFrequency;

pub const METADATA_PREFIX: &str = "rd-sync-meta_";

const COLLECTION_MAPPING: &str = "collectionMapping";
const RAINDROP_MAPPING: &str = "raindropMapping";
const LAST_SYNC_TIMESTAMP: &str = "lastSyncTimestamp";
const ROOT_FOLDER_ID: &str = "rootFolderId";
const SYNC_IN_PROGRESS: &str = "syncInProgress";
const SYNC_START_TIME: &str = "syncStartTime";

pub const TOKEN_KEY: &str = "raindropToken";
pub const AUTO_SYNC_ENABLED_KEY: &str = "autoSyncEnabled";
pub const SYNC_FREQUENCY_KEY: &str = "syncFrequency";
pub const SHOW_NOTIFICATIONS_KEY: &str = "showNotifications";
pub const NEXT_AUTO_SYNC_TIME_KEY: &str = "nextAutoSyncTime";

/// Collection mapping: node key (`"unsorted"`, collection id, `group:<title>`) to folder id.
pub type CollectionMapping = BTreeMap<String, String>;
/// Raindrop mapping: item id to bookmark id.
pub type RaindropMapping = BTreeMap<i64, String>;

/// Metadata accessor shared by the engine, the controller and the dispatcher.
#[derive(Clone)]
pub struct MetadataManager {
    kv: Arc<dyn KeyValueStore>,
}

fn meta_key(key: &str) -> String {
    format!("{}{}", METADATA_PREFIX, key)
}

impl MetadataManager {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    async fn read<T: DeserializeOwned>(&self, tier: StorageTier, key: &str) -> Result<Option<T>, StorageError> {
        match self.kv.get(tier, key).await? {
            Some(Value::Null) | None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StorageError::SerializationError(format!("{}: {}", key, e))),
        }
    }

    async fn write<T: Serialize>(&self, tier: StorageTier, key: &str, value: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(value)
            .map_err(|e| StorageError::SerializationError(format!("{}: {}", key, e)))?;
        self.kv.set(tier, key, value).await
    }

    // ─── Mappings ───

    pub async fn collection_mapping(&self) -> Result<CollectionMapping, StorageError> {
        let pairs: Option<Vec<(String, String)>> =
            self.read(StorageTier::Local, &meta_key(COLLECTION_MAPPING)).await?;
        Ok(pairs.unwrap_or_default().into_iter().collect())
    }

    pub async fn set_collection_mapping(&self, mapping: &CollectionMapping) -> Result<(), StorageError> {
        let pairs: Vec<(&String, &String)> = mapping.iter().collect();
        self.write(StorageTier::Local, &meta_key(COLLECTION_MAPPING), &pairs).await
    }

    pub async fn raindrop_mapping(&self) -> Result<RaindropMapping, StorageError> {
        let pairs: Option<Vec<(i64, String)>> =
            self.read(StorageTier::Local, &meta_key(RAINDROP_MAPPING)).await?;
        Ok(pairs.unwrap_or_default().into_iter().collect())
    }

    pub async fn set_raindrop_mapping(&self, mapping: &RaindropMapping) -> Result<(), StorageError> {
        let pairs: Vec<(&i64, &String)> = mapping.iter().collect();
        self.write(StorageTier::Local, &meta_key(RAINDROP_MAPPING), &pairs).await
    }

    pub async fn root_folder_id(&self) -> Result<Option<String>, StorageError> {
        self.read(StorageTier::Local, &meta_key(ROOT_FOLDER_ID)).await
    }

    pub async fn set_root_folder_id(&self, id: &str) -> Result<(), StorageError> {
        self.write(StorageTier::Local, &meta_key(ROOT_FOLDER_ID), &id).await
    }

    // ─── Watermark ───

    /// Last processed remote change, epoch milliseconds (0 when never synced).
    pub async fn last_sync_timestamp(&self) -> Result<i64, StorageError> {
        Ok(self
            .read(StorageTier::Synced, &meta_key(LAST_SYNC_TIMESTAMP))
            .await?
            .unwrap_or(0))
    }

    /// Stores `timestamp` if it is newer than the stored watermark.
    ///
    /// Returns whether the watermark moved.
    pub async fn advance_last_sync_timestamp(&self, timestamp: i64) -> Result<bool, StorageError> {
        if timestamp <= self.last_sync_timestamp().await? {
            return Ok(false);
        }
        self.write(StorageTier::Synced, &meta_key(LAST_SYNC_TIMESTAMP), &timestamp)
            .await?;
        Ok(true)
    }

    // ─── Run marker ───

    pub async fn mark_run_started(&self, started_at: i64) -> Result<(), StorageError> {
        self.write(StorageTier::Local, &meta_key(SYNC_IN_PROGRESS), &true).await?;
        self.write(StorageTier::Local, &meta_key(SYNC_START_TIME), &started_at).await
    }

    pub async fn clear_run_marker(&self) -> Result<(), StorageError> {
        let in_progress = meta_key(SYNC_IN_PROGRESS);
        let started = meta_key(SYNC_START_TIME);
        self.kv
            .remove(StorageTier::Local, &[in_progress.as_str(), started.as_str()])
            .await
    }

    /// Start time of a run that never cleared its marker.
    pub async fn interrupted_run(&self) -> Result<Option<i64>, StorageError> {
        let in_progress: bool = self
            .read(StorageTier::Local, &meta_key(SYNC_IN_PROGRESS))
            .await?
            .unwrap_or(false);
        if !in_progress {
            return Ok(None);
        }
        Ok(Some(
            self.read(StorageTier::Local, &meta_key(SYNC_START_TIME))
                .await?
                .unwrap_or(0),
        ))
    }

    // ─── Token and preferences ───

    pub async fn token(&self) -> Result<Option<String>, StorageError> {
        let token: Option<String> = self.read(StorageTier::Synced, TOKEN_KEY).await?;
        Ok(token.filter(|t| !t.trim().is_empty()))
    }

    pub async fn set_token(&self, token: &str) -> Result<(), StorageError> {
        self.write(StorageTier::Synced, TOKEN_KEY, &token).await
    }

    pub async fn auto_sync_enabled(&self) -> Result<bool, StorageError> {
        Ok(self.read(StorageTier::Synced, AUTO_SYNC_ENABLED_KEY).await?.unwrap_or(false))
    }

    pub async fn sync_frequency(&self) -> Result<AutoSyncFrequency, StorageError> {
        let raw: Option<String> = self.read(StorageTier::Synced, SYNC_FREQUENCY_KEY).await?;
        Ok(raw
            .map(|r| AutoSyncFrequency::from_preference(&r))
            .unwrap_or_default())
    }

    pub async fn set_auto_sync(&self, enabled: bool, frequency: AutoSyncFrequency) -> Result<(), StorageError> {
        self.write(StorageTier::Synced, AUTO_SYNC_ENABLED_KEY, &enabled).await?;
        self.write(StorageTier::Synced, SYNC_FREQUENCY_KEY, &frequency.as_preference())
            .await
    }

    pub async fn show_notifications(&self) -> Result<bool, StorageError> {
        Ok(self.read(StorageTier::Synced, SHOW_NOTIFICATIONS_KEY).await?.unwrap_or(true))
    }

    pub async fn set_show_notifications(&self, show: bool) -> Result<(), StorageError> {
        self.write(StorageTier::Synced, SHOW_NOTIFICATIONS_KEY, &show).await
    }

    pub async fn next_auto_sync_time(&self) -> Result<Option<i64>, StorageError> {
        self.read(StorageTier::Synced, NEXT_AUTO_SYNC_TIME_KEY).await
    }

    pub async fn set_next_auto_sync_time(&self, at: i64) -> Result<(), StorageError> {
        self.write(StorageTier::Synced, NEXT_AUTO_SYNC_TIME_KEY, &at).await
    }

    pub async fn clear_next_auto_sync_time(&self) -> Result<(), StorageError> {
        self.kv.remove(StorageTier::Synced, &[NEXT_AUTO_SYNC_TIME_KEY]).await
    }
}
