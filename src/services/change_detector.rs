//! Decides whether a sync run has anything to do.

use tracing::debug;

use crate::managers::bookmark_manager::BookmarkStore;
use crate::managers::metadata_manager::MetadataManager;
use crate::services::raindrop_client::RemoteCatalog;
use crate::types::errors::SyncError;
use crate::types::status::SyncReason;

/// Verdict of the change detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeDecision {
    pub needed: bool,
    pub reason: SyncReason,
    /// Remote latest-change timestamp, when it was read.
    pub remote_latest: Option<i64>,
}

impl ChangeDecision {
    fn new(needed: bool, reason: SyncReason, remote_latest: Option<i64>) -> Self {
        Self { needed, reason, remote_latest }
    }
}

/// Pure sync predicate. Rules apply in order: missing local root, empty local
/// root, no remote items, then strictly-newer remote change.
pub fn should_sync(
    remote_latest: Option<i64>,
    last_processed: i64,
    local_root_exists: bool,
    local_root_non_empty: bool,
) -> ChangeDecision {
    if !local_root_exists {
        return ChangeDecision::new(true, SyncReason::MissingLocalFolder, remote_latest);
    }
    if !local_root_non_empty {
        return ChangeDecision::new(true, SyncReason::EmptyLocalFolder, remote_latest);
    }
    match remote_latest {
        None => ChangeDecision::new(false, SyncReason::NoRemoteItems, None),
        Some(ts) if ts > last_processed => ChangeDecision::new(true, SyncReason::NewChanges, Some(ts)),
        Some(ts) => ChangeDecision::new(false, SyncReason::UpToDate, Some(ts)),
    }
}

/// Reads local and remote state and applies [`should_sync`].
///
/// The remote is only queried once the local root is known to exist and hold
/// something. Nothing is written.
pub async fn detect_changes(
    store: &dyn BookmarkStore,
    remote: &dyn RemoteCatalog,
    metadata: &MetadataManager,
    root_title: &str,
) -> Result<ChangeDecision, SyncError> {
    let roots = store.find_top_level_folders_by_title(root_title).await?;
    let exists = !roots.is_empty();

    let mut non_empty = false;
    for root in &roots {
        if !store.list_children(&root.id).await?.is_empty() {
            non_empty = true;
            break;
        }
    }

    if !exists || !non_empty {
        return Ok(should_sync(None, 0, exists, non_empty));
    }

    let remote_latest = remote.get_latest_change_timestamp().await?;
    let last_processed = metadata.last_sync_timestamp().await?;
    let decision = should_sync(remote_latest, last_processed, exists, non_empty);
    debug!(?remote_latest, last_processed, needed = decision.needed, "change check");
    Ok(decision)
}
