use serde::{Deserialize, Serialize};

/// Severity of a status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Info,
    Success,
    Warning,
    Error,
}

/// Phase of a sync run. Terminal phases are `Completed`, `Failed` and `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Checking,
    PreparingStructure,
    FetchingItems,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl SyncPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncPhase::Completed | SyncPhase::Failed | SyncPhase::Cancelled)
    }
}

/// One status update emitted towards an optional observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub status: String,
    #[serde(rename = "type")]
    pub kind: StatusKind,
    pub step: Option<SyncPhase>,
    pub is_processing: bool,
}

impl StatusEvent {
    /// An in-flight progress event for `step`.
    pub fn progress(status: impl Into<String>, step: SyncPhase) -> Self {
        Self {
            status: status.into(),
            kind: StatusKind::Info,
            step: Some(step),
            is_processing: true,
        }
    }

    /// A terminal (or idle) event; `is_processing` is false.
    pub fn settled(status: impl Into<String>, kind: StatusKind, step: Option<SyncPhase>) -> Self {
        Self {
            status: status.into(),
            kind,
            step,
            is_processing: false,
        }
    }

    pub fn idle() -> Self {
        Self::settled("Ready", StatusKind::Info, Some(SyncPhase::Idle))
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    Manual,
    Alarm,
}

/// A request to run the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    pub trigger: SyncTrigger,
    /// Skip the change detector and always rebuild.
    pub force: bool,
}

impl SyncRequest {
    pub fn manual() -> Self {
        Self { trigger: SyncTrigger::Manual, force: false }
    }

    pub fn alarm() -> Self {
        Self { trigger: SyncTrigger::Alarm, force: false }
    }
}

/// Why the change detector asked for (or skipped) a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    MissingLocalFolder,
    EmptyLocalFolder,
    NewChanges,
    UpToDate,
    NoRemoteItems,
    Forced,
}

/// Per-item counters of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: usize,
    pub deleted: usize,
}

impl ItemCounts {
    pub fn success_count(&self) -> usize {
        self.created + self.updated
    }

    pub fn processed(&self) -> usize {
        self.created + self.updated + self.unchanged + self.skipped + self.errors
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    UpToDate,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub reason: SyncReason,
    pub counts: ItemCounts,
    pub folders_created: usize,
    pub folders_reused: usize,
    pub pages: u32,
    /// Watermark committed by this run, if it advanced.
    pub watermark: Option<i64>,
}

impl SyncReport {
    pub fn up_to_date(reason: SyncReason) -> Self {
        Self {
            outcome: SyncOutcome::UpToDate,
            reason,
            counts: ItemCounts::default(),
            folders_created: 0,
            folders_reused: 0,
            pages: 0,
            watermark: None,
        }
    }

    /// One-line summary used for the terminal status event.
    pub fn summary(&self) -> String {
        match self.outcome {
            SyncOutcome::UpToDate => "Bookmarks are up to date".to_string(),
            _ => format!(
                "{} created, {} updated, {} unchanged, {} skipped, {} errors, {} removed",
                self.counts.created,
                self.counts.updated,
                self.counts.unchanged,
                self.counts.skipped,
                self.counts.errors,
                self.counts.deleted
            ),
        }
    }
}
