//! App Core for Raindrop Sync.
//!
//! Central struct holding the stores, the remote client and the sync
//! controller, and running the startup sequence.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::database::connection::Database;
use crate::managers::alarm_manager::AlarmManager;
use crate::managers::bookmark_manager::{BookmarkStore, SqliteBookmarkStore};
use crate::managers::kv_store::{KeyValueStore, SqliteKvStore};
use crate::managers::metadata_manager::MetadataManager;
use crate::services::raindrop_client::{RaindropClient, RemoteCatalog};
use crate::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use crate::services::status_channel::{Notifier, StatusChannel, TracingNotifier};
use crate::services::sync_controller::SyncController;
use crate::types::errors::SyncError;

/// Central application struct holding all managers and services.
///
/// Shared behind an `Arc` by the request loop, the status forwarder and the
/// alarm listener.
pub struct App {
    pub db: Arc<Database>,
    pub bookmarks: Arc<dyn BookmarkStore>,
    pub remote: Arc<dyn RemoteCatalog>,
    pub metadata: MetadataManager,
    pub alarms: Arc<AlarmManager>,
    pub status: Arc<StatusChannel>,
    pub controller: SyncController,
    pub settings_engine: Mutex<SettingsEngine>,
}

impl App {
    /// Opens the database at `db_path`, loads settings and builds the HTTP client.
    ///
    /// The returned receiver yields the names of fired alarms.
    pub fn new(
        db_path: &str,
        settings_path: Option<String>,
    ) -> Result<(Self, UnboundedReceiver<String>), Box<dyn std::error::Error>> {
        let db = Arc::new(Database::open(db_path)?);

        let mut settings_engine = SettingsEngine::new(settings_path);
        let settings = settings_engine.load()?;
        let remote: Arc<dyn RemoteCatalog> = Arc::new(RaindropClient::new(&settings.api)?);

        info!(db = db_path, config = settings_engine.get_config_path(), "app initialized");
        Ok(Self::with_components(db, remote, settings_engine, Arc::new(TracingNotifier)))
    }

    /// Wires an app around an already opened database and a given remote catalog.
    pub fn with_components(
        db: Arc<Database>,
        remote: Arc<dyn RemoteCatalog>,
        settings_engine: SettingsEngine,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, UnboundedReceiver<String>) {
        let kv: Arc<dyn KeyValueStore> = Arc::new(SqliteKvStore::new(db.clone()));
        let bookmarks: Arc<dyn BookmarkStore> = Arc::new(SqliteBookmarkStore::new(db.clone()));
        let metadata = MetadataManager::new(kv.clone());
        let (alarms, alarm_rx) = AlarmManager::new(kv);
        let alarms = Arc::new(alarms);
        let status = Arc::new(StatusChannel::new());

        let controller = SyncController::new(
            bookmarks.clone(),
            remote.clone(),
            metadata.clone(),
            status.clone(),
            alarms.clone(),
            notifier,
            settings_engine.get_settings().sync.clone(),
        );

        let app = Self {
            db,
            bookmarks,
            remote,
            metadata,
            alarms,
            status,
            controller,
            settings_engine: Mutex::new(settings_engine),
        };
        (app, alarm_rx)
    }

    /// Startup sequence: restore the token and alarms, reschedule auto sync
    /// keeping a pending fire time, and clear a marker left by a dead run.
    pub async fn startup(&self) -> Result<(), SyncError> {
        let token = self.metadata.token().await?;
        self.remote.set_token(token.as_deref());

        let restored = self.alarms.restore().await?;
        self.controller.setup_auto_sync(true).await?;
        if let Some(started_at) = self.controller.recover_interrupted_run().await? {
            warn!(started_at, "recovered from an interrupted sync");
        }
        info!(restored_alarms = restored, has_token = token.is_some(), "startup complete");
        Ok(())
    }
}
