//! Raindrop Sync RPC Server: newline-delimited JSON over stdin/stdout.
//!
//! Request:  {"id":1, "action":"start-sync", "force":false}
//! Response: {"id":1, "result":{"success":true,"message":"Sync started"}}
//! Event:    {"event":"statusUpdate","status":"...","type":"info","step":"checking","isProcessing":true}
//!
//! Logs go to stderr, filtered by `RAINDROP_SYNC_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use raindrop_sync::app::App;
use raindrop_sync::platform;
use raindrop_sync::rpc_handler::handle_message;

fn init_tracing() {
    let filter = EnvFilter::try_from_env("RAINDROP_SYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// `RAINDROP_SYNC_DATA_DIR` wins over the platform data directory.
fn database_path() -> PathBuf {
    match std::env::var("RAINDROP_SYNC_DATA_DIR") {
        Ok(dir) => PathBuf::from(dir).join("raindrop-sync.db"),
        Err(_) => platform::get_database_path(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let db_path = database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let (app, mut alarm_rx) = App::new(&db_path.to_string_lossy(), None)?;
    let app = Arc::new(app);

    // Single writer so responses and events never interleave mid-line.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(message) = out_rx.recv().await {
            let line = format!("{}\n", message);
            if let Err(e) = stdout.write_all(line.as_bytes()).await {
                error!(error = %e, "stdout closed");
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut status_rx = app.status.subscribe();
    let events_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => {
                    let mut message = match serde_json::to_value(&event) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(error = %e, "status event not serializable");
                            continue;
                        }
                    };
                    message["event"] = json!("statusUpdate");
                    if events_tx.send(message).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "status observer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let alarm_app = app.clone();
    tokio::spawn(async move {
        while let Some(name) = alarm_rx.recv().await {
            if alarm_app.controller.on_alarm_fire(&name).await.is_some() {
                info!(alarm = %name, "periodic sync started");
            }
        }
    });

    if let Err(e) = app.startup().await {
        warn!(error = %e, "startup incomplete");
    }

    let _ = out_tx.send(json!({"event": "ready", "version": env!("CARGO_PKG_VERSION")}));

    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                let _ = out_tx.send(json!({"id": null, "error": format!("parse error: {}", e)}));
                continue;
            }
        };

        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let response = handle_message(&app, &request).await;
        let _ = out_tx.send(json!({"id": id, "result": response}));
    }

    info!("stdin closed, shutting down");
    app.controller.cancel();
    forwarder.abort();
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}
