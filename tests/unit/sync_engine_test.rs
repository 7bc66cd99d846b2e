//! End-to-end reconciler tests: fake remote catalog, real SQLite bookmark
//! tree and metadata store.

#[path = "../support/mod.rs"]
mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use raindrop_sync::managers::bookmark_manager::BookmarkStore;
use raindrop_sync::services::sync_engine::{CancelToken, SyncEngine, MAX_TITLE_CHARS};
use raindrop_sync::types::bookmark::{BookmarkChanges, BookmarkNode, FolderChanges};
use raindrop_sync::types::errors::StoreError;
use raindrop_sync::types::settings::{EngineSettings, MaterializationPolicy};
use raindrop_sync::types::status::{SyncOutcome, SyncPhase, SyncReason, SyncRequest};

use support::{collection, group, item, Harness};

const ROOT: &str = "Raindrop";
const WORK: i64 = 10;
const READING: i64 = 20;

fn forced() -> SyncRequest {
    SyncRequest { force: true, ..SyncRequest::manual() }
}

/// Store that fails bookmark creation for one URL and can cancel a run after
/// a number of folder creations. Everything else goes to the real store.
struct ScriptedStore {
    inner: Arc<dyn BookmarkStore>,
    fail_url: Option<String>,
    cancel_after_folders: Option<(usize, CancelToken)>,
    folders: AtomicUsize,
}

impl ScriptedStore {
    fn over(inner: Arc<dyn BookmarkStore>) -> Self {
        Self {
            inner,
            fail_url: None,
            cancel_after_folders: None,
            folders: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BookmarkStore for ScriptedStore {
    async fn create_folder(&self, parent_id: &str, title: &str) -> Result<BookmarkNode, StoreError> {
        let folder = self.inner.create_folder(parent_id, title).await?;
        let made = self.folders.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, token)) = &self.cancel_after_folders {
            if made >= *limit {
                token.cancel();
            }
        }
        Ok(folder)
    }

    async fn update_folder(&self, id: &str, changes: FolderChanges) -> Result<BookmarkNode, StoreError> {
        self.inner.update_folder(id, changes).await
    }

    async fn delete_folder_recursive(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete_folder_recursive(id).await
    }

    async fn create_bookmark(&self, parent_id: &str, title: &str, url: &str) -> Result<BookmarkNode, StoreError> {
        if self.fail_url.as_deref() == Some(url) {
            return Err(StoreError::DatabaseError("disk I/O error".to_string()));
        }
        self.inner.create_bookmark(parent_id, title, url).await
    }

    async fn update_bookmark(&self, id: &str, changes: BookmarkChanges) -> Result<BookmarkNode, StoreError> {
        self.inner.update_bookmark(id, changes).await
    }

    async fn delete_bookmark(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete_bookmark(id).await
    }

    async fn get_node(&self, id: &str) -> Result<Option<BookmarkNode>, StoreError> {
        self.inner.get_node(id).await
    }

    async fn list_children(&self, parent_id: &str) -> Result<Vec<BookmarkNode>, StoreError> {
        self.inner.list_children(parent_id).await
    }

    async fn find_top_level_folders_by_title(&self, title: &str) -> Result<Vec<BookmarkNode>, StoreError> {
        self.inner.find_top_level_folders_by_title(title).await
    }

    fn bookmarks_bar_id(&self) -> String {
        self.inner.bookmarks_bar_id()
    }
}

fn scripted_engine(h: &Harness, store: ScriptedStore) -> SyncEngine {
    SyncEngine::new(
        Arc::new(store),
        h.remote.clone(),
        h.metadata.clone(),
        h.status.clone(),
        EngineSettings::default(),
    )
}

/// Two root collections, two items in Work and one unsorted item.
fn work_and_reading(h: &Harness) {
    h.remote.set_collections(
        vec![collection(WORK, "Work", None, 0), collection(READING, "Reading", None, 1)],
        vec![],
    );
    h.remote.set_items(vec![
        item(1, "Rust Book", Some("https://doc.rust-lang.org/book/"), WORK, 1_000),
        item(2, "Tokio", Some("https://tokio.rs"), WORK, 3_000),
        item(3, "Later", Some("https://later.example"), -1, 2_000),
    ]);
}

#[tokio::test]
async fn test_first_sync_builds_tree_and_advances_watermark() {
    let h = Harness::new();
    work_and_reading(&h);

    let report = h
        .engine(EngineSettings::default())
        .run(SyncRequest::manual(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.reason, SyncReason::MissingLocalFolder);
    assert_eq!(report.outcome, SyncOutcome::Completed);
    assert_eq!(report.counts.created, 3);
    assert_eq!(report.counts.errors, 0);
    assert_eq!(report.watermark, Some(3_000));

    assert_eq!(h.root_children(ROOT).await, vec!["Unsorted", "Work", "Reading"]);
    assert_eq!(
        h.bookmarks_in(ROOT, &["Unsorted"]).await,
        vec![("Later".to_string(), "https://later.example".to_string())]
    );
    assert_eq!(
        h.bookmarks_in(ROOT, &["Work"]).await,
        vec![
            ("Rust Book".to_string(), "https://doc.rust-lang.org/book/".to_string()),
            ("Tokio".to_string(), "https://tokio.rs".to_string()),
        ]
    );
    assert!(h.bookmarks_in(ROOT, &["Reading"]).await.is_empty());
    assert_eq!(h.metadata.last_sync_timestamp().await.unwrap(), 3_000);

    let mapping = h.metadata.collection_mapping().await.unwrap();
    let keys: Vec<&str> = mapping.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["10", "20", "unsorted"]);
    assert_eq!(h.metadata.raindrop_mapping().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_groups_become_folders_with_other_last() {
    let h = Harness::new();
    work_and_reading(&h);
    h.remote.set_groups(vec![group("G1", 0, &[WORK])]);

    h.engine(EngineSettings::default())
        .run(SyncRequest::manual(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(h.root_children(ROOT).await, vec!["Unsorted", "G1", "Other"]);
    assert_eq!(h.bookmarks_in(ROOT, &["G1", "Work"]).await.len(), 2);
    assert!(h.bookmarks_in(ROOT, &["Other", "Reading"]).await.is_empty());
    assert_eq!(h.bookmarks_in(ROOT, &["Unsorted"]).await.len(), 1);
}

#[tokio::test]
async fn test_nested_collections_follow_parents() {
    let h = Harness::new();
    h.remote.set_collections(
        vec![collection(WORK, "Work", None, 0)],
        vec![
            collection(11, "Docs", Some(WORK), 1),
            collection(12, "Api", Some(WORK), 0),
            collection(13, "Guides", Some(11), 0),
        ],
    );
    h.remote
        .set_items(vec![item(1, "Guide", Some("https://guide.example"), 13, 10)]);

    h.engine(EngineSettings::default())
        .run(SyncRequest::manual(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(h.bookmarks_in(ROOT, &["Work", "Docs", "Guides"]).await.len(), 1);
    let work_children: Vec<String> = {
        let mapping = h.metadata.collection_mapping().await.unwrap();
        h.store
            .list_children(&mapping["10"])
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.title)
            .collect()
    };
    assert_eq!(work_children, vec!["Api", "Docs"]);
}

#[tokio::test]
async fn test_stable_resync_reuses_everything() {
    let h = Harness::new();
    work_and_reading(&h);
    let engine = h.engine(EngineSettings::default());

    let first = engine.run(forced(), &CancelToken::new()).await.unwrap();
    let folders = h.metadata.collection_mapping().await.unwrap();
    let items = h.metadata.raindrop_mapping().await.unwrap();

    let second = engine.run(forced(), &CancelToken::new()).await.unwrap();

    assert_eq!(first.reason, SyncReason::Forced);
    assert_eq!(second.folders_created, 0);
    assert_eq!(second.folders_reused, 3);
    assert_eq!(second.counts.created, 0);
    assert_eq!(second.counts.unchanged, 3);
    assert_eq!(h.metadata.collection_mapping().await.unwrap(), folders);
    assert_eq!(h.metadata.raindrop_mapping().await.unwrap(), items);
    assert_eq!(h.root_children(ROOT).await, vec!["Unsorted", "Work", "Reading"]);
    assert_eq!(h.all_urls(ROOT).await.len(), 3);
}

#[tokio::test]
async fn test_unchanged_remote_is_up_to_date() {
    let h = Harness::new();
    work_and_reading(&h);
    let engine = h.engine(EngineSettings::default());
    engine.run(SyncRequest::manual(), &CancelToken::new()).await.unwrap();

    let report = engine
        .run(SyncRequest::manual(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, SyncOutcome::UpToDate);
    assert_eq!(report.reason, SyncReason::UpToDate);
    assert_eq!(report.counts.processed(), 0);
}

#[tokio::test]
async fn test_invalid_and_missing_urls_are_skipped() {
    let h = Harness::new();
    h.remote.set_items(vec![
        item(1, "ftp", Some("ftp://x"), -1, 10),
        item(2, "none", None, -1, 20),
        item(3, "script", Some("javascript:void(0)"), -1, 30),
        item(4, "ok", Some("https://ok.example"), -1, 40),
    ]);

    let report = h
        .engine(EngineSettings::default())
        .run(SyncRequest::manual(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.counts.skipped, 3);
    assert_eq!(report.counts.errors, 0);
    assert_eq!(report.counts.created, 1);
    assert_eq!(h.all_urls(ROOT).await, vec!["https://ok.example".to_string()]);
}

#[tokio::test]
async fn test_unresolved_collection_skipped_unless_routed() {
    let h = Harness::new();
    h.remote
        .set_items(vec![item(1, "stray", Some("https://stray.example"), 999, 10)]);

    let report = h
        .engine(EngineSettings::default())
        .run(forced(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.counts.skipped, 1);
    assert!(h.all_urls(ROOT).await.is_empty());

    let routed = EngineSettings {
        route_unresolved_to_unsorted: true,
        ..EngineSettings::default()
    };
    let report = h.engine(routed).run(forced(), &CancelToken::new()).await.unwrap();
    assert_eq!(report.counts.created, 1);
    assert_eq!(h.bookmarks_in(ROOT, &["Unsorted"]).await.len(), 1);
}

#[tokio::test]
async fn test_long_titles_are_truncated_and_blank_titles_use_url() {
    let h = Harness::new();
    h.remote.set_items(vec![
        item(1, &"t".repeat(1500), Some("https://long.example"), -1, 10),
        item(2, "   ", Some("https://untitled.example"), -1, 20),
    ]);

    h.engine(EngineSettings::default())
        .run(SyncRequest::manual(), &CancelToken::new())
        .await
        .unwrap();

    let bookmarks = h.bookmarks_in(ROOT, &["Unsorted"]).await;
    assert_eq!(bookmarks[0].0.chars().count(), MAX_TITLE_CHARS);
    assert!(bookmarks[0].0.ends_with("..."));
    assert_eq!(bookmarks[1].0, "https://untitled.example");
}

#[tokio::test]
async fn test_renamed_collection_keeps_its_folder() {
    let h = Harness::new();
    work_and_reading(&h);
    let engine = h.engine(EngineSettings::default());
    engine.run(SyncRequest::manual(), &CancelToken::new()).await.unwrap();
    let before = h.metadata.collection_mapping().await.unwrap();

    h.remote.set_collections(
        vec![collection(WORK, "Job", None, 0), collection(READING, "Reading", None, 1)],
        vec![],
    );
    let report = engine.run(forced(), &CancelToken::new()).await.unwrap();

    assert_eq!(report.folders_created, 0);
    assert_eq!(h.root_children(ROOT).await, vec!["Unsorted", "Job", "Reading"]);
    assert_eq!(h.metadata.collection_mapping().await.unwrap()["10"], before["10"]);
    assert_eq!(h.bookmarks_in(ROOT, &["Job"]).await.len(), 2);
}

#[tokio::test]
async fn test_removed_collection_folder_is_pruned() {
    let h = Harness::new();
    work_and_reading(&h);
    let engine = h.engine(EngineSettings::default());
    engine.run(SyncRequest::manual(), &CancelToken::new()).await.unwrap();
    let reading_folder = h.metadata.collection_mapping().await.unwrap()["20"].clone();

    h.remote
        .set_collections(vec![collection(WORK, "Work", None, 0)], vec![]);
    engine.run(forced(), &CancelToken::new()).await.unwrap();

    assert_eq!(h.root_children(ROOT).await, vec!["Unsorted", "Work"]);
    assert!(h.store.get_node(&reading_folder).await.unwrap().is_none());
    assert!(!h.metadata.collection_mapping().await.unwrap().contains_key("20"));
}

#[tokio::test]
async fn test_moved_and_edited_items_are_updated_in_place() {
    let h = Harness::new();
    work_and_reading(&h);
    let engine = h.engine(EngineSettings::default());
    engine.run(SyncRequest::manual(), &CancelToken::new()).await.unwrap();
    let bookmark_id = h.metadata.raindrop_mapping().await.unwrap()[&1].clone();

    h.remote.set_items(vec![
        item(1, "The Book", Some("https://doc.rust-lang.org/book/"), READING, 4_000),
        item(2, "Tokio", Some("https://tokio.rs"), WORK, 3_000),
        item(3, "Later", Some("https://later.example"), -1, 2_000),
    ]);
    let report = engine
        .run(SyncRequest::manual(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.reason, SyncReason::NewChanges);
    assert_eq!(report.counts.updated, 1);
    assert_eq!(report.counts.unchanged, 2);
    assert_eq!(h.metadata.raindrop_mapping().await.unwrap()[&1], bookmark_id);
    assert_eq!(
        h.bookmarks_in(ROOT, &["Reading"]).await,
        vec![("The Book".to_string(), "https://doc.rust-lang.org/book/".to_string())]
    );
    assert_eq!(h.metadata.last_sync_timestamp().await.unwrap(), 4_000);
}

#[tokio::test]
async fn test_items_removed_remotely_are_deleted() {
    let h = Harness::new();
    work_and_reading(&h);
    let engine = h.engine(EngineSettings::default());
    engine.run(SyncRequest::manual(), &CancelToken::new()).await.unwrap();

    h.remote.set_items(vec![
        item(1, "Rust Book", Some("https://doc.rust-lang.org/book/"), WORK, 5_000),
        item(3, "Later", Some("https://later.example"), -1, 2_000),
    ]);
    let report = engine
        .run(SyncRequest::manual(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.counts.deleted, 1);
    assert_eq!(h.bookmarks_in(ROOT, &["Work"]).await.len(), 1);
    assert!(!h.metadata.raindrop_mapping().await.unwrap().contains_key(&2));
}

#[tokio::test]
async fn test_removed_items_kept_when_deletion_disabled() {
    let h = Harness::new();
    work_and_reading(&h);
    let settings = EngineSettings {
        delete_removed_items: false,
        ..EngineSettings::default()
    };
    let engine = h.engine(settings);
    engine.run(SyncRequest::manual(), &CancelToken::new()).await.unwrap();

    h.remote.set_items(vec![item(3, "Later", Some("https://later.example"), -1, 9_000)]);
    let report = engine.run(forced(), &CancelToken::new()).await.unwrap();

    assert_eq!(report.counts.deleted, 0);
    assert_eq!(h.all_urls(ROOT).await.len(), 3);
    assert_eq!(h.metadata.raindrop_mapping().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_page_failure_keeps_watermark_and_bookmarks() {
    let h = Harness::new();
    work_and_reading(&h);
    let settings = EngineSettings {
        per_page: 2,
        ..EngineSettings::default()
    };
    let engine = h.engine(settings);
    engine.run(SyncRequest::manual(), &CancelToken::new()).await.unwrap();
    assert_eq!(h.metadata.last_sync_timestamp().await.unwrap(), 3_000);

    h.remote.set_items(vec![
        item(1, "Rust Book", Some("https://doc.rust-lang.org/book/"), WORK, 1_000),
        item(2, "Tokio", Some("https://tokio.rs"), WORK, 3_000),
        item(3, "Later", Some("https://later.example"), -1, 2_000),
        item(4, "New", Some("https://new.example"), READING, 7_000),
    ]);
    h.remote.fail_page(Some(1));
    let report = engine
        .run(SyncRequest::manual(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, SyncOutcome::CompletedWithErrors);
    assert_eq!(report.counts.errors, 1);
    assert_eq!(report.counts.deleted, 0);
    assert_eq!(report.watermark, None);
    assert_eq!(h.metadata.last_sync_timestamp().await.unwrap(), 3_000);
    assert_eq!(h.metadata.raindrop_mapping().await.unwrap().len(), 3);
    assert_eq!(h.all_urls(ROOT).await.len(), 3);

    h.remote.fail_page(None);
    let report = engine
        .run(SyncRequest::manual(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.outcome, SyncOutcome::Completed);
    assert_eq!(report.counts.created, 1);
    assert_eq!(h.metadata.last_sync_timestamp().await.unwrap(), 7_000);
}

#[tokio::test]
async fn test_cancel_before_structure_leaves_store_untouched() {
    let h = Harness::new();
    work_and_reading(&h);
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = h
        .engine(EngineSettings::default())
        .run(SyncRequest::manual(), &cancel)
        .await
        .unwrap();

    assert_eq!(report.outcome, SyncOutcome::Cancelled);
    assert!(h
        .store
        .find_top_level_folder_by_title(ROOT)
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.metadata.last_sync_timestamp().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_during_items_keeps_mappings_unpersisted() {
    let h = Harness::new();
    work_and_reading(&h);
    let (entered, release) = h.remote.gate();
    let engine = h.engine(EngineSettings::default());
    let cancel = CancelToken::new();

    let control = async {
        entered.notified().await;
        cancel.cancel();
        release.notify_one();
    };
    let (report, ()) = tokio::join!(engine.run(SyncRequest::manual(), &cancel), control);
    let report = report.unwrap();

    assert_eq!(report.outcome, SyncOutcome::Cancelled);
    assert_eq!(report.counts.created, 0);
    assert!(h.metadata.raindrop_mapping().await.unwrap().is_empty());
    assert_eq!(h.metadata.last_sync_timestamp().await.unwrap(), 0);
    assert_eq!(h.metadata.collection_mapping().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_stable_policy_collapses_duplicate_roots() {
    let h = Harness::new();
    work_and_reading(&h);
    let bar = h.store.bookmarks_bar_id();
    let first = h.store.create_folder(&bar, ROOT).await.unwrap();
    h.store.create_folder(&bar, ROOT).await.unwrap();

    h.engine(EngineSettings::default())
        .run(SyncRequest::manual(), &CancelToken::new())
        .await
        .unwrap();

    let roots = h.store.find_top_level_folders_by_title(ROOT).await.unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].id, first.id);
    assert_eq!(h.metadata.root_folder_id().await.unwrap(), Some(first.id));
}

#[tokio::test]
async fn test_destructive_policy_rebuilds_from_scratch() {
    let h = Harness::new();
    work_and_reading(&h);
    let settings = EngineSettings {
        materialization: MaterializationPolicy::Destructive,
        ..EngineSettings::default()
    };
    let engine = h.engine(settings);

    engine.run(forced(), &CancelToken::new()).await.unwrap();
    let first_root = h.metadata.root_folder_id().await.unwrap().unwrap();
    let report = engine.run(forced(), &CancelToken::new()).await.unwrap();
    let second_root = h.metadata.root_folder_id().await.unwrap().unwrap();

    assert_ne!(first_root, second_root);
    assert!(h.store.get_node(&first_root).await.unwrap().is_none());
    assert_eq!(report.counts.created, 3);
    assert_eq!(report.folders_created, 4);
    assert_eq!(h.store.find_top_level_folders_by_title(ROOT).await.unwrap().len(), 1);
    assert_eq!(h.all_urls(ROOT).await.len(), 3);
}

#[tokio::test]
async fn test_progress_events_follow_phase_order() {
    let h = Harness::new();
    work_and_reading(&h);
    let mut rx = h.status.subscribe();

    h.engine(EngineSettings::default())
        .run(SyncRequest::manual(), &CancelToken::new())
        .await
        .unwrap();

    let mut phases = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert!(event.is_processing);
        if phases.last() != event.step.as_ref() {
            phases.push(event.step.unwrap());
        }
    }
    assert_eq!(
        phases,
        vec![
            SyncPhase::Checking,
            SyncPhase::PreparingStructure,
            SyncPhase::FetchingItems,
            SyncPhase::Finalizing,
        ]
    );
}

#[tokio::test]
async fn test_stable_policy_follows_remote_folder_order() {
    let h = Harness::new();
    work_and_reading(&h);
    let engine = h.engine(EngineSettings::default());
    engine.run(SyncRequest::manual(), &CancelToken::new()).await.unwrap();
    let before = h.metadata.collection_mapping().await.unwrap();

    h.remote.set_collections(
        vec![
            collection(30, "Inbox", None, -5),
            collection(READING, "Reading", None, 1),
            collection(WORK, "Work", None, 2),
        ],
        vec![],
    );
    let report = engine.run(forced(), &CancelToken::new()).await.unwrap();

    assert_eq!(report.folders_created, 1);
    assert_eq!(report.folders_reused, 3);
    assert_eq!(h.root_children(ROOT).await, vec!["Unsorted", "Inbox", "Reading", "Work"]);
    let after = h.metadata.collection_mapping().await.unwrap();
    assert_eq!(after["10"], before["10"]);
    assert_eq!(after["20"], before["20"]);
    assert_eq!(h.bookmarks_in(ROOT, &["Work"]).await.len(), 2);
}

#[tokio::test]
async fn test_reordered_subfolders_stay_ahead_of_bookmarks() {
    let h = Harness::new();
    h.remote.set_collections(
        vec![collection(WORK, "Work", None, 0)],
        vec![collection(11, "Alpha", Some(WORK), 0), collection(12, "Beta", Some(WORK), 1)],
    );
    h.remote.set_items(vec![item(1, "Tokio", Some("https://tokio.rs"), WORK, 1_000)]);
    let engine = h.engine(EngineSettings::default());
    engine.run(SyncRequest::manual(), &CancelToken::new()).await.unwrap();

    h.remote.set_collections(
        vec![collection(WORK, "Work", None, 0)],
        vec![collection(12, "Beta", Some(WORK), 0), collection(11, "Alpha", Some(WORK), 1)],
    );
    engine.run(forced(), &CancelToken::new()).await.unwrap();

    let work = h.metadata.collection_mapping().await.unwrap()["10"].clone();
    let titles: Vec<String> = h
        .store
        .list_children(&work)
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.title)
        .collect();
    assert_eq!(titles, vec!["Beta", "Alpha", "Tokio"]);
}

#[tokio::test]
async fn test_cancel_while_listing_collections_persists_no_folders() {
    let h = Harness::new();
    let roots = (0..50)
        .map(|i| collection(100 + i, &format!("Collection {}", i), None, i))
        .collect();
    h.remote.set_collections(roots, vec![]);
    let cancel = CancelToken::new();
    h.remote.cancel_on_collections(cancel.clone());

    let report = h
        .engine(EngineSettings::default())
        .run(SyncRequest::manual(), &cancel)
        .await
        .unwrap();

    assert_eq!(report.outcome, SyncOutcome::Cancelled);
    assert!(h.root_children(ROOT).await.is_empty());
    assert!(h.metadata.collection_mapping().await.unwrap().is_empty());
    assert_eq!(h.metadata.last_sync_timestamp().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_between_folders_stops_materializing() {
    let h = Harness::new();
    let roots = (0..50)
        .map(|i| collection(100 + i, &format!("Collection {}", i), None, i))
        .collect();
    h.remote.set_collections(roots, vec![]);
    let cancel = CancelToken::new();
    let mut store = ScriptedStore::over(h.store.clone());
    // The sync root plus four folders under it.
    store.cancel_after_folders = Some((5, cancel.clone()));

    let report = scripted_engine(&h, store)
        .run(SyncRequest::manual(), &cancel)
        .await
        .unwrap();

    assert_eq!(report.outcome, SyncOutcome::Cancelled);
    assert_eq!(h.root_children(ROOT).await.len(), 4);
    assert!(h.metadata.collection_mapping().await.unwrap().is_empty());
    assert!(h.metadata.raindrop_mapping().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_new_root_watermark_includes_trash_changes() {
    let h = Harness::new();
    work_and_reading(&h);
    h.remote.set_trash(vec![item(9, "Gone", Some("https://gone.example"), -99, 5_000)]);
    let engine = h.engine(EngineSettings::default());

    let first = engine
        .run(SyncRequest::manual(), &CancelToken::new())
        .await
        .unwrap();
    let second = engine
        .run(SyncRequest::manual(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(first.reason, SyncReason::MissingLocalFolder);
    assert_eq!(first.watermark, Some(5_000));
    assert_eq!(h.metadata.last_sync_timestamp().await.unwrap(), 5_000);
    assert_eq!(second.outcome, SyncOutcome::UpToDate);
    assert_eq!(second.reason, SyncReason::UpToDate);
}

#[tokio::test]
async fn test_failing_bookmark_write_is_counted_and_holds_watermark() {
    let h = Harness::new();
    work_and_reading(&h);
    let mut store = ScriptedStore::over(h.store.clone());
    store.fail_url = Some("https://tokio.rs".to_string());

    let report = scripted_engine(&h, store)
        .run(SyncRequest::manual(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, SyncOutcome::CompletedWithErrors);
    assert_eq!(report.counts.errors, 1);
    assert_eq!(report.counts.created, 2);
    assert_eq!(report.watermark, None);
    assert_eq!(h.metadata.last_sync_timestamp().await.unwrap(), 0);
    assert_eq!(
        h.all_urls(ROOT).await,
        vec!["https://doc.rust-lang.org/book/", "https://later.example"]
    );
    assert_eq!(h.metadata.raindrop_mapping().await.unwrap().len(), 2);
}
