//! Integration-level unit tests for the SettingsEngine public API.
//!
//! These tests exercise the SettingsEngine through its public trait interface,
//! validating default loading, value persistence, validation and reset.

use raindrop_sync::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use raindrop_sync::types::errors::SettingsError;
use raindrop_sync::types::settings::{MaterializationPolicy, SyncSettings};
use rstest::rstest;
use tempfile::TempDir;

/// Helper: create a SettingsEngine backed by a temp directory that lives for the
/// duration of the test (the caller holds the `TempDir` handle).
fn engine_in_temp(dir: &TempDir) -> SettingsEngine {
    let path = dir
        .path()
        .join("settings.json")
        .to_string_lossy()
        .to_string();
    SettingsEngine::new(Some(path))
}

/// When no config file exists on disk, `load()` returns the built-in defaults.
#[test]
fn test_load_defaults_when_no_config_file_exists() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);

    let settings = engine.load().unwrap();

    assert_eq!(settings, SyncSettings::default());
    assert_eq!(settings.sync.root_folder_title, "Raindrop");
    assert_eq!(settings.sync.per_page, 50);
    assert_eq!(settings.sync.materialization, MaterializationPolicy::Stable);
    assert_eq!(settings.api.base_url, "https://api.raindrop.io/rest/v1");
}

/// A change made through `set_value` is visible to a fresh engine on the same file.
#[test]
fn test_set_value_persists_changes() {
    let dir = TempDir::new().unwrap();

    {
        let mut engine = engine_in_temp(&dir);
        engine.load().unwrap();
        engine
            .set_value("sync.root_folder_title", serde_json::json!("Bookmarks from Raindrop"))
            .unwrap();
        engine
            .set_value("sync.route_unresolved_to_unsorted", serde_json::json!(true))
            .unwrap();
    }

    let mut engine = engine_in_temp(&dir);
    let settings = engine.load().unwrap();
    assert_eq!(settings.sync.root_folder_title, "Bookmarks from Raindrop");
    assert!(settings.sync.route_unresolved_to_unsorted);
}

#[rstest]
#[case("", serde_json::json!(1))]
#[case("sync.unknown", serde_json::json!(1))]
#[case("nope.per_page", serde_json::json!(1))]
#[case("sync.per_page.inner", serde_json::json!(1))]
fn test_set_value_rejects_bad_keys(#[case] key: &str, #[case] value: serde_json::Value) {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);
    engine.load().unwrap();

    assert!(matches!(engine.set_value(key, value), Err(SettingsError::InvalidKey(_))));
    assert_eq!(engine.get_settings(), &SyncSettings::default());
}

#[rstest]
#[case("sync.per_page", serde_json::json!("fifty"))]
#[case("sync.per_page", serde_json::json!(500))]
#[case("sync.materialization", serde_json::json!("Sometimes"))]
#[case("api.base_url", serde_json::json!(""))]
fn test_set_value_rejects_bad_values(#[case] key: &str, #[case] value: serde_json::Value) {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);
    engine.load().unwrap();

    assert!(matches!(engine.set_value(key, value), Err(SettingsError::InvalidValue(_))));
}

/// A hand-edited file missing the newer `delete_removed_items` flag still loads.
#[test]
fn test_load_fills_defaulted_fields() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);
    let mut value = serde_json::to_value(SyncSettings::default()).unwrap();
    value["sync"].as_object_mut().unwrap().remove("delete_removed_items");
    std::fs::write(engine.get_config_path(), value.to_string()).unwrap();

    let settings = engine.load().unwrap();
    assert!(settings.sync.delete_removed_items);
}

#[test]
fn test_load_malformed_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);
    std::fs::write(engine.get_config_path(), "{ not json").unwrap();

    assert!(matches!(engine.load(), Err(SettingsError::SerializationError(_))));
}

/// `reset()` restores defaults in memory and on disk.
#[test]
fn test_reset_restores_defaults() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_in_temp(&dir);
    engine.load().unwrap();
    engine.set_value("sync.per_page", serde_json::json!(10)).unwrap();

    engine.reset().unwrap();
    assert_eq!(engine.get_settings(), &SyncSettings::default());

    let mut reloaded = engine_in_temp(&dir);
    assert_eq!(reloaded.load().unwrap(), SyncSettings::default());
}
