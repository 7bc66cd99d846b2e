//! Status broadcasting and end-of-run notifications.
//!
//! Delivery is best-effort: emitting with no subscriber attached is normal.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::types::status::StatusEvent;

const CHANNEL_CAPACITY: usize = 64;

/// Fan-out of [`StatusEvent`]s that also remembers the most recent one.
pub struct StatusChannel {
    tx: broadcast::Sender<StatusEvent>,
    last: Mutex<StatusEvent>,
}

impl StatusChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            last: Mutex::new(StatusEvent::idle()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: StatusEvent) {
        debug!(status = %event.status, kind = ?event.kind, step = ?event.step, "status");
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = event.clone();
        if self.tx.send(event).is_err() {
            debug!("no status observer attached");
        }
    }

    /// The last emitted event, or the idle event before the first run.
    pub fn last(&self) -> StatusEvent {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Sink for user-facing notifications at the end of a run.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str);
}

/// Writes notifications to the log.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, title: &str, message: &str) {
        info!(title, message, "notification");
    }
}
