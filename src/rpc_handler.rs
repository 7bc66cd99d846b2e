//! Command handler for the Raindrop Sync JSON-lines protocol.
//!
//! Kept apart from `rpc_server.rs` so it can be tested without stdin/stdout.
//! `handle_message` parses a raw request, `handle_command` dispatches a typed
//! [`Command`] to the controller, the metadata store and the remote client.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::app::App;
use crate::services::sync_controller::NextSyncTime;
use crate::services::sync_engine::usable_url;
use crate::types::errors::{RemoteError, SyncError};
use crate::types::raindrop::NewItem;
use crate::types::settings::AutoSyncFrequency;
use crate::types::status::{SyncRequest, SyncTrigger};

/// A request understood by the dispatcher, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Command {
    StartSync {
        #[serde(default)]
        force: bool,
    },
    CancelSync,
    GetStatus,
    UpdateAutoSyncSettings {
        enabled: bool,
        #[serde(default)]
        frequency: Option<String>,
    },
    GetNextSyncTime,
    SaveToken {
        token: String,
    },
    TestConnection,
    AddItems {
        items: Vec<NewItem>,
    },
}

const KNOWN_ACTIONS: &[&str] = &[
    "start-sync",
    "cancel-sync",
    "get-status",
    "update-auto-sync-settings",
    "get-next-sync-time",
    "save-token",
    "test-connection",
    "add-items",
];

/// Uniform reply: `{success, message?, data?}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: Some(message.into()), data: None }
    }

    pub fn with_data(data: Value) -> Self {
        Self { success: true, message: None, data: Some(data) }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self { success: false, message: Some(message.into()), data: None }
    }
}

/// Parses `message` as a [`Command`] and dispatches it.
pub async fn handle_message(app: &App, message: &Value) -> CommandResponse {
    let Some(action) = message.get("action").and_then(Value::as_str) else {
        return CommandResponse::fail("missing action");
    };
    if !KNOWN_ACTIONS.contains(&action) {
        debug!(action, "unknown action");
        return CommandResponse::fail(format!("unknown action: {}", action));
    }
    match serde_json::from_value::<Command>(message.clone()) {
        Ok(command) => handle_command(app, command).await,
        Err(e) => CommandResponse::fail(format!("invalid {} request: {}", action, e)),
    }
}

/// Dispatches one command.
pub async fn handle_command(app: &App, command: Command) -> CommandResponse {
    match command {
        // ─── Sync lifecycle ───
        Command::StartSync { force } => {
            let request = SyncRequest { trigger: SyncTrigger::Manual, force };
            match app.controller.try_start(request).await {
                Ok(_) => CommandResponse::ok("Sync started"),
                Err(e) => CommandResponse::fail(e.to_string()),
            }
        }
        Command::CancelSync => {
            if app.controller.cancel() {
                CommandResponse::ok("Cancellation requested")
            } else {
                CommandResponse::fail("No sync in progress")
            }
        }
        Command::GetStatus => match serde_json::to_value(app.controller.get_status()) {
            Ok(status) => CommandResponse::with_data(status),
            Err(e) => CommandResponse::fail(e.to_string()),
        },

        // ─── Auto sync ───
        Command::UpdateAutoSyncSettings { enabled, frequency } => {
            let frequency = frequency.as_deref().map(AutoSyncFrequency::from_preference);
            match app.controller.update_auto_sync(enabled, frequency).await {
                Ok(alarm) => CommandResponse::with_data(json!({
                    "enabled": enabled,
                    "nextSyncTime": alarm.map(|a| a.scheduled_time),
                })),
                Err(e) => CommandResponse::fail(e.to_string()),
            }
        }
        Command::GetNextSyncTime => match app.controller.next_sync_time().await {
            Ok(NextSyncTime::At(at)) => CommandResponse::with_data(json!({ "nextSyncTime": at })),
            Ok(NextSyncTime::Disabled) => CommandResponse::fail("Auto sync is disabled"),
            Ok(NextSyncTime::Unscheduled) => CommandResponse::fail("No sync alarm scheduled"),
            Err(e) => CommandResponse::fail(e.to_string()),
        },

        // ─── Account ───
        Command::SaveToken { token } => {
            let token = token.trim();
            if token.is_empty() {
                return CommandResponse::fail("Please enter a token");
            }
            if let Err(e) = app.metadata.set_token(token).await {
                return CommandResponse::fail(e.to_string());
            }
            app.remote.set_token(Some(token));
            CommandResponse::ok("Token saved")
        }
        Command::TestConnection => test_connection(app).await,
        Command::AddItems { items } => add_items(app, items).await,
    }
}

async fn test_connection(app: &App) -> CommandResponse {
    match app.metadata.token().await {
        Ok(Some(_)) => {}
        Ok(None) => return CommandResponse::fail(SyncError::MissingToken.to_string()),
        Err(e) => return CommandResponse::fail(e.to_string()),
    }
    match app.remote.get_user().await {
        Ok(user) => CommandResponse::ok(format!(
            "Connection successful! Logged in as: {}",
            user.display_name()
        )),
        Err(RemoteError::InvalidToken) => {
            CommandResponse::fail("Connection failed: the API token was rejected")
        }
        Err(e) => CommandResponse::fail(format!("Connection failed: {}", e)),
    }
}

async fn add_items(app: &App, items: Vec<NewItem>) -> CommandResponse {
    if items.is_empty() {
        return CommandResponse::fail("No items provided");
    }
    let requested = items.len();
    let valid: Vec<NewItem> = items
        .into_iter()
        .filter(|item| usable_url(Some(&item.url)).is_some())
        .collect();
    if valid.len() < requested {
        warn!(dropped = requested - valid.len(), "add-items ignored entries without an http(s) url");
    }
    if valid.is_empty() {
        return CommandResponse::fail("No valid items provided");
    }

    match app.remote.create_items(&valid).await {
        Ok(created) => CommandResponse {
            success: true,
            message: Some(format!("Added {} of {} items", created.len(), requested)),
            data: Some(json!({ "items": created })),
        },
        Err(e) => CommandResponse::fail(e.to_string()),
    }
}
