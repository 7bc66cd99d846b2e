//! Sync lifecycle controller.
//!
//! Owns the single-flight guard: at most one run is active, and a request made
//! while one is active is rejected rather than queued. Every run executes on
//! its own tokio task under a watchdog. The guard is released on every exit
//! path, including a panicking run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::managers::alarm_manager::{now_ms, Alarm, AlarmManager};
use crate::managers::bookmark_manager::BookmarkStore;
use crate::managers::metadata_manager::MetadataManager;
use crate::services::raindrop_client::RemoteCatalog;
use crate::services::status_channel::{Notifier, StatusChannel};
use crate::services::sync_engine::{CancelToken, SyncEngine};
use crate::types::errors::SyncError;
use crate::types::settings::{AutoSyncFrequency, EngineSettings};
use crate::types::status::{
    StatusEvent, StatusKind, SyncOutcome, SyncPhase, SyncReport, SyncRequest,
};

/// Name of the periodic sync alarm.
pub const SYNC_ALARM_NAME: &str = "raindrop-sync";

const MINUTE_MS: i64 = 60_000;
const NOTIFICATION_TITLE: &str = "Raindrop Sync";

/// Snapshot returned by `get-status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub is_syncing: bool,
    pub started_at: Option<i64>,
    pub last_status: StatusEvent,
}

/// Answer of the next-sync-time query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextSyncTime {
    Disabled,
    At(i64),
    Unscheduled,
}

#[derive(Default)]
struct RunState {
    is_syncing: bool,
    run_id: u64,
    started_at: Option<i64>,
    cancel: Option<CancelToken>,
    watchdog: Option<JoinHandle<()>>,
}

struct Inner {
    store: Arc<dyn BookmarkStore>,
    remote: Arc<dyn RemoteCatalog>,
    metadata: MetadataManager,
    status: Arc<StatusChannel>,
    alarms: Arc<AlarmManager>,
    notifier: Arc<dyn Notifier>,
    settings: Mutex<EngineSettings>,
    state: Mutex<RunState>,
}

/// Handle on a started run.
pub struct RunHandle {
    task: JoinHandle<Result<SyncReport, SyncError>>,
}

impl RunHandle {
    /// Waits for the run to end.
    pub async fn wait(self) -> Result<SyncReport, SyncError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(SyncError::Cancelled),
        }
    }
}

/// Clears the single-flight flag if the run task unwinds before finishing.
struct FlightGuard {
    inner: Arc<Inner>,
    run_id: u64,
    armed: bool,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.armed && self.inner.finish(self.run_id) {
            error!(run = self.run_id, "sync run ended unexpectedly");
            self.inner.status.emit(StatusEvent::settled(
                "Sync failed unexpectedly",
                StatusKind::Error,
                Some(SyncPhase::Failed),
            ));
        }
    }
}

/// The sync lifecycle controller. Cheap to clone.
#[derive(Clone)]
pub struct SyncController {
    inner: Arc<Inner>,
}

impl SyncController {
    pub fn new(
        store: Arc<dyn BookmarkStore>,
        remote: Arc<dyn RemoteCatalog>,
        metadata: MetadataManager,
        status: Arc<StatusChannel>,
        alarms: Arc<AlarmManager>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                metadata,
                status,
                alarms,
                notifier,
                settings: Mutex::new(settings),
                state: Mutex::new(RunState::default()),
            }),
        }
    }

    /// Replaces the engine settings used by subsequent runs.
    pub fn update_settings(&self, settings: EngineSettings) {
        *self.inner.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.state().is_syncing
    }

    pub fn get_status(&self) -> ControllerStatus {
        let state = self.inner.state();
        ControllerStatus {
            is_syncing: state.is_syncing,
            started_at: state.started_at,
            last_status: self.inner.status.last(),
        }
    }

    /// Starts a run in the background.
    ///
    /// Fails with [`SyncError::MissingToken`] when no token is stored and with
    /// [`SyncError::AlreadyInProgress`] when a run is active.
    pub async fn try_start(&self, request: SyncRequest) -> Result<RunHandle, SyncError> {
        if self.inner.metadata.token().await?.is_none() {
            return Err(SyncError::MissingToken);
        }

        let settings = self.inner.settings.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let cancel = CancelToken::new();
        let timed_out = Arc::new(AtomicBool::new(false));
        let started_at = now_ms();
        let run_id = {
            let mut state = self.inner.state();
            if state.is_syncing {
                return Err(SyncError::AlreadyInProgress);
            }
            state.is_syncing = true;
            state.run_id += 1;
            state.started_at = Some(started_at);
            state.cancel = Some(cancel.clone());
            state.run_id
        };
        info!(run = run_id, trigger = ?request.trigger, force = request.force, "sync started");

        let timeout_minutes = settings.timeout_minutes;
        let task = tokio::spawn(Inner::run_guarded(
            self.inner.clone(),
            run_id,
            request,
            settings,
            cancel.clone(),
            timed_out.clone(),
        ));

        if timeout_minutes > 0 {
            let watchdog = tokio::spawn(Inner::watchdog(
                self.inner.clone(),
                run_id,
                Duration::from_secs(timeout_minutes * 60),
                cancel,
                timed_out,
            ));
            let mut state = self.inner.state();
            if state.run_id == run_id && state.is_syncing {
                state.watchdog = Some(watchdog);
            } else {
                watchdog.abort();
            }
        }

        Ok(RunHandle { task })
    }

    /// Starts a run and waits for it.
    pub async fn run_to_completion(&self, request: SyncRequest) -> Result<SyncReport, SyncError> {
        self.try_start(request).await?.wait().await
    }

    /// Requests cancellation of the active run. Returns false when idle.
    pub fn cancel(&self) -> bool {
        let cancel = {
            let state = self.inner.state();
            if !state.is_syncing {
                return false;
            }
            state.cancel.clone()
        };
        match cancel {
            Some(token) => {
                info!("sync cancellation requested");
                token.cancel();
                self.inner.status.emit(StatusEvent::progress("Cancelling sync", SyncPhase::Cancelled));
                true
            }
            None => false,
        }
    }

    // ─── Periodic sync ───

    /// Applies the stored auto-sync preferences to the alarm.
    ///
    /// With `preserve`, a still-future stored next fire time is kept instead
    /// of restarting the full delay.
    pub async fn setup_auto_sync(&self, preserve: bool) -> Result<Option<Alarm>, SyncError> {
        let metadata = &self.inner.metadata;
        if !metadata.auto_sync_enabled().await? {
            self.inner.alarms.clear(SYNC_ALARM_NAME).await?;
            metadata.clear_next_auto_sync_time().await?;
            info!("auto sync disabled");
            return Ok(None);
        }

        let frequency = metadata.sync_frequency().await?;
        let (mut delay, period) = frequency.schedule();
        if preserve {
            let now = now_ms();
            if let Some(next) = metadata.next_auto_sync_time().await?.filter(|next| *next > now) {
                delay = preserved_delay_minutes(next, now);
                debug!(next, delay, "preserving auto sync schedule");
            }
        }

        let alarm = self
            .inner
            .alarms
            .create(SYNC_ALARM_NAME, delay, Some(period))
            .await?;
        metadata.set_next_auto_sync_time(alarm.scheduled_time).await?;
        info!(frequency = frequency.as_preference(), delay, period, "auto sync scheduled");
        Ok(Some(alarm))
    }

    /// Stores new auto-sync preferences and reschedules from scratch.
    pub async fn update_auto_sync(
        &self,
        enabled: bool,
        frequency: Option<AutoSyncFrequency>,
    ) -> Result<Option<Alarm>, SyncError> {
        let metadata = &self.inner.metadata;
        let frequency = match frequency {
            Some(f) => f,
            None => metadata.sync_frequency().await?,
        };
        metadata.set_auto_sync(enabled, frequency).await?;
        self.setup_auto_sync(false).await
    }

    pub async fn next_sync_time(&self) -> Result<NextSyncTime, SyncError> {
        let metadata = &self.inner.metadata;
        if !metadata.auto_sync_enabled().await? {
            return Ok(NextSyncTime::Disabled);
        }
        if let Some(next) = metadata.next_auto_sync_time().await?.filter(|next| *next > now_ms()) {
            return Ok(NextSyncTime::At(next));
        }
        match self.inner.alarms.get(SYNC_ALARM_NAME) {
            Some(alarm) => {
                metadata.set_next_auto_sync_time(alarm.scheduled_time).await?;
                Ok(NextSyncTime::At(alarm.scheduled_time))
            }
            None => Ok(NextSyncTime::Unscheduled),
        }
    }

    /// Handles a fired alarm. Returns the started run, if any.
    pub async fn on_alarm_fire(&self, name: &str) -> Option<RunHandle> {
        if name != SYNC_ALARM_NAME {
            debug!(alarm = name, "ignoring unrelated alarm");
            return None;
        }

        let metadata = &self.inner.metadata;
        match metadata.sync_frequency().await {
            Ok(frequency) => {
                let next = now_ms() + frequency.period_minutes() as i64 * MINUTE_MS;
                if let Err(e) = metadata.set_next_auto_sync_time(next).await {
                    warn!(error = %e, "failed to store next auto sync time");
                }
            }
            Err(e) => warn!(error = %e, "failed to read sync frequency"),
        }

        if self.is_syncing() {
            info!("periodic sync skipped, a sync is already running");
            return None;
        }
        match self.try_start(SyncRequest::alarm()).await {
            Ok(handle) => Some(handle),
            Err(SyncError::AlreadyInProgress) => {
                info!("periodic sync skipped, a sync is already running");
                None
            }
            Err(e) => {
                warn!(error = %e, "periodic sync not started");
                None
            }
        }
    }

    /// Clears a run marker left by a process that died mid-run.
    ///
    /// Returns the start time of the interrupted run.
    pub async fn recover_interrupted_run(&self) -> Result<Option<i64>, SyncError> {
        let metadata = &self.inner.metadata;
        let Some(started_at) = metadata.interrupted_run().await? else {
            return Ok(None);
        };
        metadata.clear_run_marker().await?;
        warn!(started_at, "previous sync was interrupted");
        self.inner.status.emit(StatusEvent::settled(
            "Previous sync was interrupted",
            StatusKind::Warning,
            None,
        ));
        Ok(Some(started_at))
    }
}

/// Minutes until `next`, rounded up, at least 1.
pub fn preserved_delay_minutes(next: i64, now: i64) -> u64 {
    let remaining = (next - now).max(0);
    let minutes = (remaining + MINUTE_MS - 1) / MINUTE_MS;
    minutes.max(1) as u64
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Releases the guard if `run_id` still holds it.
    fn finish(&self, run_id: u64) -> bool {
        let mut state = self.state();
        if state.run_id != run_id || !state.is_syncing {
            return false;
        }
        state.is_syncing = false;
        state.started_at = None;
        state.cancel = None;
        if let Some(watchdog) = state.watchdog.take() {
            watchdog.abort();
        }
        true
    }

    async fn run_guarded(
        inner: Arc<Inner>,
        run_id: u64,
        request: SyncRequest,
        settings: EngineSettings,
        cancel: CancelToken,
        timed_out: Arc<AtomicBool>,
    ) -> Result<SyncReport, SyncError> {
        let mut guard = FlightGuard {
            inner: inner.clone(),
            run_id,
            armed: true,
        };

        if let Err(e) = inner.metadata.mark_run_started(now_ms()).await {
            warn!(error = %e, "failed to record run marker");
        }

        let engine = SyncEngine::new(
            inner.store.clone(),
            inner.remote.clone(),
            inner.metadata.clone(),
            inner.status.clone(),
            settings,
        );
        let result = engine.run(request, &cancel).await;

        guard.armed = false;
        if timed_out.load(Ordering::SeqCst) {
            debug!(run = run_id, "timed-out run finished late");
            return Err(SyncError::Timeout);
        }
        if inner.finish(run_id) {
            if let Err(e) = inner.metadata.clear_run_marker().await {
                warn!(error = %e, "failed to clear run marker");
            }
            inner.report(&result).await;
        }
        result
    }

    async fn watchdog(
        inner: Arc<Inner>,
        run_id: u64,
        timeout: Duration,
        cancel: CancelToken,
        timed_out: Arc<AtomicBool>,
    ) {
        tokio::time::sleep(timeout).await;
        {
            let mut state = inner.state();
            if state.run_id != run_id || !state.is_syncing {
                return;
            }
            state.is_syncing = false;
            state.started_at = None;
            state.cancel = None;
            state.watchdog = None;
        }
        timed_out.store(true, Ordering::SeqCst);
        cancel.cancel();

        error!(run = run_id, timeout_secs = timeout.as_secs(), "sync timed out");
        if let Err(e) = inner.metadata.clear_run_marker().await {
            warn!(error = %e, "failed to clear run marker");
        }
        inner.status.emit(StatusEvent::settled(
            "Sync timed out",
            StatusKind::Error,
            Some(SyncPhase::Failed),
        ));
        inner.notify("Sync timed out").await;
    }

    async fn report(&self, result: &Result<SyncReport, SyncError>) {
        let (message, kind, step) = match result {
            Ok(report) => match report.outcome {
                SyncOutcome::UpToDate => (report.summary(), StatusKind::Success, SyncPhase::Completed),
                SyncOutcome::Completed => (
                    format!("Sync completed: {}", report.summary()),
                    StatusKind::Success,
                    SyncPhase::Completed,
                ),
                SyncOutcome::CompletedWithErrors => (
                    format!("Sync completed with errors: {}", report.summary()),
                    StatusKind::Warning,
                    SyncPhase::Completed,
                ),
                SyncOutcome::Failed => (
                    format!("Sync failed: {}", report.summary()),
                    StatusKind::Error,
                    SyncPhase::Failed,
                ),
                SyncOutcome::Cancelled => ("Sync cancelled".to_string(), StatusKind::Warning, SyncPhase::Cancelled),
            },
            Err(e) if e.is_auth_failure() => (
                format!("Sync failed: {}. Please check your API token", e),
                StatusKind::Error,
                SyncPhase::Failed,
            ),
            Err(e) => (format!("Sync failed: {}", e), StatusKind::Error, SyncPhase::Failed),
        };

        match result {
            Ok(report) => info!(outcome = ?report.outcome, "{}", message),
            Err(e) => error!(error = %e, "sync failed"),
        }
        self.status.emit(StatusEvent::settled(message.clone(), kind, Some(step)));

        let up_to_date = matches!(result, Ok(report) if report.outcome == SyncOutcome::UpToDate);
        if !up_to_date {
            self.notify(&message).await;
        }
    }

    async fn notify(&self, message: &str) {
        let enabled = match self.metadata.show_notifications().await {
            Ok(enabled) => enabled,
            Err(e) => {
                debug!(error = %e, "failed to read notification preference");
                true
            }
        };
        if enabled {
            self.notifier.notify(NOTIFICATION_TITLE, message).await;
        }
    }
}
