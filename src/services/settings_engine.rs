// Raindrop Sync Settings Engine
// Engine configuration persisted as `settings.json`. Read once at startup;
// single values can be patched by dotted path and written back.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::platform;
use crate::services::raindrop_client::MAX_PAGE_SIZE;
use crate::types::errors::SettingsError;
use crate::types::settings::SyncSettings;

const SETTINGS_FILE: &str = "settings.json";

/// Loading, patching and persisting [`SyncSettings`].
pub trait SettingsEngineTrait {
    fn load(&mut self) -> Result<SyncSettings, SettingsError>;
    fn save(&self) -> Result<(), SettingsError>;
    fn get_settings(&self) -> &SyncSettings;
    fn set_value(&mut self, key: &str, value: Value) -> Result<(), SettingsError>;
    fn reset(&mut self) -> Result<(), SettingsError>;
    fn get_config_path(&self) -> &str;
}

/// File-backed [`SettingsEngineTrait`] implementation.
pub struct SettingsEngine {
    config_path: String,
    settings: SyncSettings,
}

impl SettingsEngine {
    /// `path_override` replaces `<config dir>/settings.json`.
    pub fn new(path_override: Option<String>) -> Self {
        let config_path = path_override.unwrap_or_else(|| {
            platform::get_config_dir()
                .join(SETTINGS_FILE)
                .to_string_lossy()
                .into_owned()
        });
        Self {
            config_path,
            settings: SyncSettings::default(),
        }
    }
}

fn io_error(action: &str, e: std::io::Error) -> SettingsError {
    SettingsError::IoError(format!("Failed to {} config file: {}", action, e))
}

/// Rejects values serde accepts but the engine cannot run with.
fn validate(settings: &SyncSettings) -> Result<(), SettingsError> {
    if settings.sync.root_folder_title.trim().is_empty() {
        return Err(SettingsError::InvalidValue(
            "sync.root_folder_title cannot be empty".to_string(),
        ));
    }
    if settings.sync.per_page == 0 || settings.sync.per_page > MAX_PAGE_SIZE {
        return Err(SettingsError::InvalidValue(format!(
            "sync.per_page must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    if settings.api.base_url.trim().is_empty() {
        return Err(SettingsError::InvalidValue("api.base_url cannot be empty".to_string()));
    }
    Ok(())
}

/// Replaces the existing leaf at `key` (dotted path) inside `doc`.
fn patch(doc: &mut Value, key: &str, value: Value) -> Result<(), SettingsError> {
    let (parent_path, leaf) = match key.rsplit_once('.') {
        Some((parent, leaf)) => (format!("/{}", parent.replace('.', "/")), leaf),
        None => (String::new(), key),
    };
    let not_found = || SettingsError::InvalidKey(format!("Key '{}' not found in settings", key));

    let parent = doc.pointer_mut(&parent_path).ok_or_else(not_found)?;
    let Value::Object(map) = parent else {
        return Err(SettingsError::InvalidKey(format!(
            "Cannot navigate to key '{}': intermediate value is not an object",
            key
        )));
    };
    match map.get_mut(leaf) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(not_found()),
    }
}

impl SettingsEngineTrait for SettingsEngine {
    /// Reads the config file. A missing file yields the defaults; a malformed
    /// or invalid one is an error and leaves the current settings untouched.
    fn load(&mut self) -> Result<SyncSettings, SettingsError> {
        let path = Path::new(&self.config_path);
        let settings = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| io_error("read", e))?;
            let parsed: SyncSettings = serde_json::from_str(&content).map_err(|e| {
                SettingsError::SerializationError(format!("Failed to parse config file: {}", e))
            })?;
            validate(&parsed)?;
            parsed
        } else {
            debug!(path = %self.config_path, "no settings file, using defaults");
            SyncSettings::default()
        };

        self.settings = settings;
        Ok(self.settings.clone())
    }

    fn save(&self) -> Result<(), SettingsError> {
        let path = Path::new(&self.config_path);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| {
                SettingsError::IoError(format!("Failed to create config directory: {}", e))
            })?;
        }
        let json = serde_json::to_string_pretty(&self.settings).map_err(|e| {
            SettingsError::SerializationError(format!("Failed to serialize settings: {}", e))
        })?;
        fs::write(path, json).map_err(|e| io_error("write", e))
    }

    fn get_settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Sets one value by dotted path (`"sync.per_page"`, `"api.base_url"`)
    /// and saves. The patched document must still deserialize and validate.
    fn set_value(&mut self, key: &str, value: Value) -> Result<(), SettingsError> {
        if key.is_empty() {
            return Err(SettingsError::InvalidKey("Key cannot be empty".to_string()));
        }
        let mut doc = serde_json::to_value(&self.settings).map_err(|e| {
            SettingsError::SerializationError(format!("Failed to serialize settings: {}", e))
        })?;
        patch(&mut doc, key, value)?;

        let updated: SyncSettings = serde_json::from_value(doc).map_err(|e| {
            SettingsError::InvalidValue(format!("Invalid value for key '{}': {}", key, e))
        })?;
        validate(&updated)?;

        self.settings = updated;
        self.save()?;
        debug!(key, "setting updated");
        Ok(())
    }

    fn reset(&mut self) -> Result<(), SettingsError> {
        self.settings = SyncSettings::default();
        self.save()
    }

    fn get_config_path(&self) -> &str {
        &self.config_path
    }
}
