// Raindrop Sync state managers
// Managers own durable state: the native bookmark tree, the key-value store,
// sync metadata and the alarm schedule.

pub mod alarm_manager;
pub mod bookmark_manager;
pub mod kv_store;
pub mod metadata_manager;
