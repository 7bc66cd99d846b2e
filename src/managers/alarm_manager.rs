//! Named recurring timers, persisted across restarts.
//!
//! Each alarm is armed as a tokio task that waits in bounded slices and
//! re-reads the wall clock after every slice, so a host that was suspended
//! fires overdue alarms as soon as it resumes instead of drifting by the
//! suspended time. Fires are delivered by name on an mpsc channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::managers::kv_store::{KeyValueStore, StorageTier};
use crate::types::errors::StorageError;

const ALARMS_KEY: &str = "alarms";
const MAX_SLICE: Duration = Duration::from_secs(60);
const MINUTE_MS: i64 = 60_000;

/// A scheduled alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    pub name: String,
    /// Next fire, epoch milliseconds.
    pub scheduled_time: i64,
    pub period_minutes: Option<u64>,
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

type AlarmTable = Arc<Mutex<HashMap<String, Alarm>>>;

/// Owner of all alarms of the process.
pub struct AlarmManager {
    kv: Arc<dyn KeyValueStore>,
    alarms: AlarmTable,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    fires: mpsc::UnboundedSender<String>,
}

impl AlarmManager {
    /// Creates the manager and the receiver on which alarm names are delivered when they fire.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (fires, rx) = mpsc::unbounded_channel();
        let manager = Self {
            kv,
            alarms: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(HashMap::new()),
            fires,
        };
        (manager, rx)
    }

    /// Creates (or replaces) the alarm `name`, first firing after `delay_minutes`.
    pub async fn create(
        &self,
        name: &str,
        delay_minutes: u64,
        period_minutes: Option<u64>,
    ) -> Result<Alarm, StorageError> {
        let alarm = Alarm {
            name: name.to_string(),
            scheduled_time: now_ms() + delay_minutes as i64 * MINUTE_MS,
            period_minutes,
        };
        self.arm(alarm.clone());
        self.persist().await?;
        debug!(alarm = name, scheduled_time = alarm.scheduled_time, "alarm created");
        Ok(alarm)
    }

    /// Removes the alarm `name`. Returns whether it existed.
    pub async fn clear(&self, name: &str) -> Result<bool, StorageError> {
        let task = self.lock_tasks().remove(name);
        if let Some(handle) = task {
            handle.abort();
        }
        let existed = self.lock_alarms().remove(name).is_some();
        self.persist().await?;
        Ok(existed)
    }

    pub fn get(&self, name: &str) -> Option<Alarm> {
        self.lock_alarms().get(name).cloned()
    }

    /// Re-arms every alarm persisted by a previous process. Overdue alarms fire immediately.
    pub async fn restore(&self) -> Result<usize, StorageError> {
        let stored = match self.kv.get(StorageTier::Local, ALARMS_KEY).await? {
            Some(value) => serde_json::from_value::<Vec<Alarm>>(value)
                .map_err(|e| StorageError::SerializationError(format!("{}: {}", ALARMS_KEY, e)))?,
            None => Vec::new(),
        };
        let count = stored.len();
        for alarm in stored {
            self.arm(alarm);
        }
        Ok(count)
    }

    fn lock_alarms(&self) -> std::sync::MutexGuard<'_, HashMap<String, Alarm>> {
        self.alarms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn persist(&self) -> Result<(), StorageError> {
        persist_table(&self.kv, &self.alarms).await
    }

    fn arm(&self, alarm: Alarm) {
        let name = alarm.name.clone();
        self.lock_alarms().insert(name.clone(), alarm);

        let task = tokio::spawn(run_alarm(
            name.clone(),
            self.alarms.clone(),
            self.kv.clone(),
            self.fires.clone(),
        ));
        if let Some(previous) = self.lock_tasks().insert(name, task) {
            previous.abort();
        }
    }
}

impl Drop for AlarmManager {
    fn drop(&mut self) {
        for (_, handle) in self.lock_tasks().drain() {
            handle.abort();
        }
    }
}

async fn persist_table(kv: &Arc<dyn KeyValueStore>, table: &AlarmTable) -> Result<(), StorageError> {
    let snapshot: Vec<Alarm> = {
        let alarms = table.lock().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<Alarm> = alarms.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    };
    let value = serde_json::to_value(snapshot)
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;
    kv.set(StorageTier::Local, ALARMS_KEY, value).await
}

async fn run_alarm(
    name: String,
    table: AlarmTable,
    kv: Arc<dyn KeyValueStore>,
    fires: mpsc::UnboundedSender<String>,
) {
    loop {
        let scheduled = {
            let alarms = table.lock().unwrap_or_else(PoisonError::into_inner);
            match alarms.get(&name) {
                Some(alarm) => alarm.scheduled_time,
                None => return,
            }
        };

        let remaining = scheduled - now_ms();
        if remaining > 0 {
            let slice = Duration::from_millis(remaining as u64).min(MAX_SLICE);
            tokio::time::sleep(slice).await;
            continue;
        }

        if fires.send(name.clone()).is_err() {
            debug!(alarm = %name, "alarm receiver dropped, stopping timer");
            return;
        }

        let rescheduled = {
            let mut alarms = table.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(alarm) = alarms.get_mut(&name) else { return };
            let period_minutes = alarm.period_minutes;
            match period_minutes {
                Some(period) => {
                    let period_ms = period.max(1) as i64 * MINUTE_MS;
                    let mut next = alarm.scheduled_time + period_ms;
                    let now = now_ms();
                    if next <= now {
                        // Host was suspended across one or more periods
                        next = now + period_ms;
                    }
                    alarm.scheduled_time = next;
                    true
                }
                None => {
                    alarms.remove(&name);
                    false
                }
            }
        };

        if let Err(e) = persist_table(&kv, &table).await {
            warn!(alarm = %name, error = %e, "failed to persist alarm schedule");
        }
        if !rescheduled {
            return;
        }
    }
}
