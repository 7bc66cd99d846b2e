//! Sync engine: reconciles the remote collection tree and items into the
//! local bookmark tree.
//!
//! A run goes `checking -> preparing_structure -> fetching_items -> finalizing`.
//! Structural failures abort the run with an error; per-item failures are
//! counted and never abort. The watermark only moves after an error-free,
//! uncancelled run.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, info, instrument, warn};

use crate::managers::bookmark_manager::BookmarkStore;
use crate::managers::metadata_manager::{CollectionMapping, MetadataManager, RaindropMapping};
use crate::services::change_detector::{detect_changes, ChangeDecision};
use crate::services::collection_tree::{build_tree, TreeOptions};
use crate::services::raindrop_client::{fetch_items_paginated, PageHandler, RemoteCatalog};
use crate::services::status_channel::StatusChannel;
use crate::types::bookmark::{BookmarkChanges, BookmarkNode, FolderChanges};
use crate::types::collection::{CollectionNode, NodeKey, UNSORTED_COLLECTION_ID};
use crate::types::errors::{RemoteError, StoreError, SyncError};
use crate::types::raindrop::{Item, ItemQuery, PageControl};
use crate::types::settings::{EngineSettings, MaterializationPolicy};
use crate::types::status::{
    ItemCounts, StatusEvent, SyncOutcome, SyncPhase, SyncReason, SyncReport, SyncRequest,
};

/// Longest bookmark title written locally, in characters.
pub const MAX_TITLE_CHARS: usize = 1000;

/// Cooperative cancellation flag, checked at every item boundary and between phases.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Caps `title` at [`MAX_TITLE_CHARS`], replacing the tail with `...`.
pub fn truncate_title(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE_CHARS {
        return title.to_string();
    }
    let mut truncated: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
    truncated.push_str("...");
    truncated
}

/// Returns the URL when it parses and uses the http or https scheme.
pub fn usable_url(url: Option<&str>) -> Option<&str> {
    let raw = url?.trim();
    let parsed = Url::parse(raw).ok()?;
    matches!(parsed.scheme(), "http" | "https").then_some(raw)
}

fn display_title(title: &str, url: &str) -> String {
    let title = title.trim();
    truncate_title(if title.is_empty() { url } else { title })
}

fn outcome_for(counts: &ItemCounts) -> SyncOutcome {
    if counts.errors == 0 {
        SyncOutcome::Completed
    } else if counts.success_count() + counts.unchanged > 0 {
        SyncOutcome::CompletedWithErrors
    } else {
        SyncOutcome::Failed
    }
}

/// Local folders produced for one run.
struct Structure {
    root_id: String,
    folders: CollectionMapping,
    created: usize,
    reused: usize,
    cancelled: bool,
}

/// The reconciler.
pub struct SyncEngine {
    store: Arc<dyn BookmarkStore>,
    remote: Arc<dyn RemoteCatalog>,
    metadata: MetadataManager,
    status: Arc<StatusChannel>,
    settings: EngineSettings,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn BookmarkStore>,
        remote: Arc<dyn RemoteCatalog>,
        metadata: MetadataManager,
        status: Arc<StatusChannel>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            remote,
            metadata,
            status,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Runs one reconciliation.
    ///
    /// Returns `Ok` for every run that got past its structural phase, including
    /// cancelled ones (see [`SyncReport::outcome`]).
    #[instrument(skip(self, cancel), fields(trigger = ?request.trigger, force = request.force))]
    pub async fn run(&self, request: SyncRequest, cancel: &CancelToken) -> Result<SyncReport, SyncError> {
        self.status
            .emit(StatusEvent::progress("Checking for changes", SyncPhase::Checking));

        let mut decision = if request.force {
            ChangeDecision {
                needed: true,
                reason: SyncReason::Forced,
                remote_latest: self.remote.get_latest_change_timestamp().await?,
            }
        } else {
            detect_changes(
                self.store.as_ref(),
                self.remote.as_ref(),
                &self.metadata,
                &self.settings.root_folder_title,
            )
            .await?
        };

        let mut report = SyncReport::up_to_date(decision.reason);
        if !decision.needed {
            info!(reason = ?decision.reason, "bookmarks are up to date");
            return Ok(report);
        }
        info!(reason = ?decision.reason, "sync needed");
        if decision.remote_latest.is_none() {
            decision.remote_latest = self.remote.get_latest_change_timestamp().await?;
        }
        if cancel.is_cancelled() {
            report.outcome = SyncOutcome::Cancelled;
            return Ok(report);
        }

        self.status.emit(StatusEvent::progress(
            "Preparing folder structure",
            SyncPhase::PreparingStructure,
        ));
        let structure = self.prepare_structure(cancel).await?;
        report.folders_created = structure.created;
        report.folders_reused = structure.reused;
        if structure.cancelled || cancel.is_cancelled() {
            info!("sync cancelled while preparing folders, mappings left untouched");
            report.outcome = SyncOutcome::Cancelled;
            return Ok(report);
        }
        self.metadata.set_collection_mapping(&structure.folders).await?;

        self.status
            .emit(StatusEvent::progress("Fetching bookmarks", SyncPhase::FetchingItems));
        let previous = match self.settings.materialization {
            MaterializationPolicy::Stable => self.metadata.raindrop_mapping().await?,
            MaterializationPolicy::Destructive => RaindropMapping::new(),
        };
        let mut pass = ItemPass::new(self, &structure.folders, &previous, cancel);
        let query = ItemQuery {
            sort: self.settings.sort.clone(),
            ..ItemQuery::default()
        };
        let mut page_failed = false;
        match fetch_items_paginated(self.remote.as_ref(), &query, self.settings.per_page, &mut pass).await {
            Ok(summary) => debug!(fetched = summary.total_fetched, pages = summary.total_pages, "item fetch finished"),
            Err(RemoteError::InvalidToken) => return Err(RemoteError::InvalidToken.into()),
            Err(e) => {
                warn!(error = %e, "item fetch aborted");
                page_failed = true;
                pass.counts.errors += 1;
            }
        }

        self.status
            .emit(StatusEvent::progress("Finalizing", SyncPhase::Finalizing));
        let cancelled = pass.cancelled || cancel.is_cancelled();
        let ItemPass {
            counts,
            mapping,
            max_last_update,
            pages,
            ..
        } = pass;
        report.counts = counts;
        report.pages = pages;
        if cancelled {
            info!(summary = %report.summary(), "sync cancelled, mappings left untouched");
            report.outcome = SyncOutcome::Cancelled;
            return Ok(report);
        }

        let mapping = self
            .settle_unseen(&previous, mapping, !page_failed, &mut report.counts)
            .await;
        self.metadata.set_raindrop_mapping(&mapping).await?;

        if report.counts.errors == 0 {
            if let Some(ts) = decision.remote_latest.max(max_last_update) {
                if self.metadata.advance_last_sync_timestamp(ts).await? {
                    report.watermark = Some(ts);
                }
            }
        }

        report.outcome = outcome_for(&report.counts);
        info!(outcome = ?report.outcome, summary = %report.summary(), "sync finished");
        Ok(report)
    }

    /// Carries over or deletes bookmarks of previously mapped items not seen in this run.
    async fn settle_unseen(
        &self,
        previous: &RaindropMapping,
        mut mapping: RaindropMapping,
        pass_complete: bool,
        counts: &mut ItemCounts,
    ) -> RaindropMapping {
        let delete = pass_complete && counts.errors == 0 && self.settings.delete_removed_items;
        let claimed: HashSet<String> = mapping.values().cloned().collect();

        for (item_id, bookmark_id) in previous {
            if mapping.contains_key(item_id) || claimed.contains(bookmark_id) {
                continue;
            }
            if !delete {
                mapping.insert(*item_id, bookmark_id.clone());
                continue;
            }
            match self.store.delete_bookmark(bookmark_id).await {
                Ok(()) => {
                    debug!(item = item_id, bookmark = %bookmark_id, "removed bookmark of deleted item");
                    counts.deleted += 1;
                }
                Err(StoreError::NotFound(_)) => {}
                Err(e) => {
                    warn!(item = item_id, error = %e, "failed to remove bookmark, keeping mapping");
                    mapping.insert(*item_id, bookmark_id.clone());
                }
            }
        }
        mapping
    }

    #[instrument(skip(self, cancel), fields(policy = ?self.settings.materialization))]
    async fn prepare_structure(&self, cancel: &CancelToken) -> Result<Structure, SyncError> {
        let (root_id, root_created) = self.prepare_root().await?;

        let roots = self.remote.get_root_collections().await?;
        let children = self.remote.get_child_collections().await?;
        let groups = self.remote.get_user_groups().await?;
        let tree = build_tree(&roots, &children, &groups, &TreeOptions::from(&self.settings));

        let mut structure = Structure {
            root_id,
            folders: CollectionMapping::new(),
            created: usize::from(root_created),
            reused: 0,
            cancelled: false,
        };
        if cancel.is_cancelled() {
            structure.cancelled = true;
            return Ok(structure);
        }
        match self.settings.materialization {
            MaterializationPolicy::Destructive => self.materialize_fresh(&tree, &mut structure, cancel).await?,
            MaterializationPolicy::Stable => {
                let previous = self.metadata.collection_mapping().await?;
                self.materialize_stable(&tree, &previous, &mut structure, cancel).await?;
                if structure.cancelled {
                    return Ok(structure);
                }
                self.prune_stale_folders(&previous, &structure.folders).await?;
            }
        }
        info!(
            collections = roots.len() + children.len(),
            groups = groups.len(),
            created = structure.created,
            reused = structure.reused,
            "folder structure ready"
        );
        Ok(structure)
    }

    /// Finds or creates the sync root under the bookmarks bar. Only top-level
    /// folders with the exact root title are ever considered.
    async fn prepare_root(&self) -> Result<(String, bool), SyncError> {
        let title = &self.settings.root_folder_title;
        let matches = self.store.find_top_level_folders_by_title(title).await?;

        let keep = match self.settings.materialization {
            MaterializationPolicy::Destructive => None,
            MaterializationPolicy::Stable => {
                let stored = self.metadata.root_folder_id().await?;
                stored
                    .and_then(|id| matches.iter().find(|m| m.id == id))
                    .or_else(|| matches.first())
                    .map(|m| m.id.clone())
            }
        };

        for stale in matches.iter().filter(|m| Some(&m.id) != keep.as_ref()) {
            info!(folder = %stale.id, "removing stale sync root");
            self.store.delete_folder_recursive(&stale.id).await?;
        }

        let (root_id, created) = match keep {
            Some(id) => (id, false),
            None => {
                let bar = self.store.bookmarks_bar_id();
                (self.store.create_folder(&bar, title).await?.id, true)
            }
        };
        self.metadata.set_root_folder_id(&root_id).await?;
        Ok((root_id, created))
    }

    async fn materialize_fresh(
        &self,
        tree: &[CollectionNode],
        structure: &mut Structure,
        cancel: &CancelToken,
    ) -> Result<(), SyncError> {
        let mut stack: Vec<(&CollectionNode, String)> = tree
            .iter()
            .rev()
            .map(|node| (node, structure.root_id.clone()))
            .collect();

        while let Some((node, parent_id)) = stack.pop() {
            if cancel.is_cancelled() {
                structure.cancelled = true;
                return Ok(());
            }
            let folder = self.store.create_folder(&parent_id, &node.title).await?;
            structure.created += 1;
            stack.extend(node.children.iter().rev().map(|c| (c, folder.id.clone())));
            structure.folders.insert(node.key.to_string(), folder.id);
        }
        Ok(())
    }

    async fn materialize_stable(
        &self,
        tree: &[CollectionNode],
        previous: &CollectionMapping,
        structure: &mut Structure,
        cancel: &CancelToken,
    ) -> Result<(), SyncError> {
        let mut claimed: HashSet<String> = HashSet::new();
        claimed.insert(structure.root_id.clone());
        let mut stack: Vec<(&CollectionNode, String, usize)> = tree
            .iter()
            .enumerate()
            .rev()
            .map(|(index, node)| (node, structure.root_id.clone(), index))
            .collect();

        while let Some((node, parent_id, index)) = stack.pop() {
            if cancel.is_cancelled() {
                structure.cancelled = true;
                return Ok(());
            }
            let key = node.key.to_string();
            let reused = match self.reuse_mapped(previous.get(&key), node, &parent_id, &claimed).await? {
                Some(id) => Some(id),
                None => self.find_folder_by_title(&parent_id, &node.title, &claimed).await?,
            };
            let folder_id = match reused {
                Some(id) => {
                    structure.reused += 1;
                    id
                }
                None => {
                    structure.created += 1;
                    self.store.create_folder(&parent_id, &node.title).await?.id
                }
            };
            self.place_at(&parent_id, &folder_id, index).await?;

            claimed.insert(folder_id.clone());
            stack.extend(
                node.children
                    .iter()
                    .enumerate()
                    .rev()
                    .map(|(i, c)| (c, folder_id.clone(), i)),
            );
            structure.folders.insert(key, folder_id);
        }
        Ok(())
    }

    /// Reuses the previously mapped folder of `node`, renaming or moving it when needed.
    async fn reuse_mapped(
        &self,
        mapped: Option<&String>,
        node: &CollectionNode,
        parent_id: &str,
        claimed: &HashSet<String>,
    ) -> Result<Option<String>, SyncError> {
        let Some(id) = mapped else { return Ok(None) };
        if claimed.contains(id) {
            return Ok(None);
        }
        let folder = match self.store.get_node(id).await? {
            Some(folder) if folder.is_folder() => folder,
            _ => return Ok(None),
        };

        let changes = FolderChanges {
            title: (folder.title != node.title).then(|| node.title.clone()),
            parent_id: (folder.parent_id.as_deref() != Some(parent_id)).then(|| parent_id.to_string()),
            index: None,
        };
        if !changes.is_empty() {
            debug!(folder = %id, key = %node.key, ?changes, "updating mapped folder");
            self.store.update_folder(id, changes).await?;
        }
        Ok(Some(id.clone()))
    }

    /// Moves `folder_id` so it is the `index`-th folder under `parent_id`.
    /// Bookmarks sharing the parent keep their relative order.
    async fn place_at(&self, parent_id: &str, folder_id: &str, index: usize) -> Result<(), SyncError> {
        let children = self.store.list_children(parent_id).await?;
        let folders: Vec<&BookmarkNode> = children.iter().filter(|n| n.is_folder()).collect();
        if folders.get(index).is_some_and(|n| n.id == folder_id) {
            return Ok(());
        }

        let siblings: Vec<&BookmarkNode> = children.iter().filter(|n| n.id != folder_id).collect();
        let folder_slots: Vec<usize> = siblings
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_folder())
            .map(|(pos, _)| pos)
            .collect();
        let target = match folder_slots.get(index) {
            Some(&pos) => pos,
            None => folder_slots.last().map_or(0, |pos| pos + 1),
        };

        debug!(folder = %folder_id, index, target, "reordering folder");
        self.store
            .update_folder(
                folder_id,
                FolderChanges {
                    index: Some(target),
                    ..FolderChanges::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn find_folder_by_title(
        &self,
        parent_id: &str,
        title: &str,
        claimed: &HashSet<String>,
    ) -> Result<Option<String>, SyncError> {
        Ok(self
            .store
            .list_children(parent_id)
            .await?
            .into_iter()
            .find(|n| n.is_folder() && n.title == title && !claimed.contains(&n.id))
            .map(|n| n.id))
    }

    /// Deletes folders of mapping keys that vanished from the tree.
    async fn prune_stale_folders(&self, previous: &CollectionMapping, current: &CollectionMapping) -> Result<(), SyncError> {
        let live: HashSet<&String> = current.values().collect();
        for (key, folder_id) in previous {
            if current.contains_key(key) || live.contains(folder_id) {
                continue;
            }
            match self.store.delete_folder_recursive(folder_id).await {
                Ok(()) => info!(key = %key, folder = %folder_id, "removed folder of deleted collection"),
                Err(StoreError::NotFound(_)) | Err(StoreError::NotAFolder(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

enum Placement {
    Created(String),
    Updated(String),
    Unchanged(String),
}

/// Per-run item state, fed one page at a time.
struct ItemPass<'a> {
    store: &'a dyn BookmarkStore,
    status: &'a StatusChannel,
    settings: &'a EngineSettings,
    folders: &'a CollectionMapping,
    previous: &'a RaindropMapping,
    cancel: &'a CancelToken,
    mapping: RaindropMapping,
    claimed: HashSet<String>,
    folder_children: HashMap<String, Vec<BookmarkNode>>,
    counts: ItemCounts,
    max_last_update: Option<i64>,
    pages: u32,
    cancelled: bool,
}

impl<'a> ItemPass<'a> {
    fn new(
        engine: &'a SyncEngine,
        folders: &'a CollectionMapping,
        previous: &'a RaindropMapping,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            store: engine.store.as_ref(),
            status: engine.status.as_ref(),
            settings: &engine.settings,
            folders,
            previous,
            cancel,
            mapping: RaindropMapping::new(),
            claimed: HashSet::new(),
            folder_children: HashMap::new(),
            counts: ItemCounts::default(),
            max_last_update: None,
            pages: 0,
            cancelled: false,
        }
    }

    /// Folder an item of `collection_id` goes into.
    fn destination(&self, collection_id: i64) -> Option<&'a str> {
        let folders: &'a CollectionMapping = self.folders;
        let key = NodeKey::for_item_collection(collection_id).to_string();
        if let Some(folder) = folders.get(&key) {
            return Some(folder.as_str());
        }
        if collection_id == UNSORTED_COLLECTION_ID || self.settings.route_unresolved_to_unsorted {
            return folders.get(&NodeKey::Unsorted.to_string()).map(String::as_str);
        }
        None
    }

    async fn handle_item(&mut self, item: Item) {
        self.max_last_update = self.max_last_update.max(Some(item.last_update));

        if self.mapping.contains_key(&item.id) {
            debug!(item = item.id, "item repeated across pages");
            self.counts.skipped += 1;
            return;
        }
        let Some(url) = usable_url(item.url.as_deref()) else {
            debug!(item = item.id, url = ?item.url, "skipping item without http(s) url");
            self.counts.skipped += 1;
            return;
        };
        let Some(folder_id) = self.destination(item.collection_id) else {
            debug!(item = item.id, collection = item.collection_id, "skipping item of unmapped collection");
            self.counts.skipped += 1;
            return;
        };

        let title = display_title(&item.title, url);
        match self.place(item.id, folder_id, &title, url).await {
            Ok(placement) => {
                let bookmark_id = match placement {
                    Placement::Created(id) => {
                        self.counts.created += 1;
                        id
                    }
                    Placement::Updated(id) => {
                        self.counts.updated += 1;
                        id
                    }
                    Placement::Unchanged(id) => {
                        self.counts.unchanged += 1;
                        id
                    }
                };
                self.claimed.insert(bookmark_id.clone());
                self.mapping.insert(item.id, bookmark_id);
            }
            Err(e) => {
                warn!(item = item.id, error = %e, "failed to write bookmark");
                self.counts.errors += 1;
            }
        }
    }

    async fn place(&mut self, item_id: i64, folder_id: &str, title: &str, url: &str) -> Result<Placement, StoreError> {
        if let Some(bookmark_id) = self.previous.get(&item_id) {
            if !self.claimed.contains(bookmark_id) {
                if let Some(node) = self.store.get_node(bookmark_id).await? {
                    if !node.is_folder() {
                        return self.refresh(node, folder_id, title, url).await;
                    }
                }
            }
        }

        if self.settings.materialization == MaterializationPolicy::Stable {
            if let Some(node) = self.adoptable(folder_id, url).await? {
                debug!(item = item_id, bookmark = %node.id, "adopting unmapped bookmark with same url");
                return self.refresh(node, folder_id, title, url).await;
            }
        }

        let node = self.store.create_bookmark(folder_id, title, url).await?;
        Ok(Placement::Created(node.id))
    }

    async fn refresh(&self, node: BookmarkNode, folder_id: &str, title: &str, url: &str) -> Result<Placement, StoreError> {
        let changes = BookmarkChanges {
            title: (node.title != title).then(|| title.to_string()),
            url: (node.url.as_deref() != Some(url)).then(|| url.to_string()),
            parent_id: (node.parent_id.as_deref() != Some(folder_id)).then(|| folder_id.to_string()),
        };
        if changes.is_empty() {
            return Ok(Placement::Unchanged(node.id));
        }
        self.store.update_bookmark(&node.id, changes).await?;
        Ok(Placement::Updated(node.id))
    }

    /// An unclaimed bookmark with the same URL already in `folder_id`.
    async fn adoptable(&mut self, folder_id: &str, url: &str) -> Result<Option<BookmarkNode>, StoreError> {
        if !self.folder_children.contains_key(folder_id) {
            let children = self.store.list_children(folder_id).await?;
            self.folder_children.insert(folder_id.to_string(), children);
        }
        let claimed = &self.claimed;
        Ok(self.folder_children.get(folder_id).and_then(|children| {
            children
                .iter()
                .find(|n| n.url.as_deref() == Some(url) && !claimed.contains(&n.id))
                .cloned()
        }))
    }
}

#[async_trait]
impl<'a> PageHandler for ItemPass<'a> {
    async fn handle_page(&mut self, items: Vec<Item>, page_index: u32, total_so_far: usize) -> PageControl {
        self.pages += 1;
        for item in items {
            if self.cancel.is_cancelled() {
                info!(page = page_index, "cancel requested, stopping item pass");
                self.cancelled = true;
                return PageControl::Stop;
            }
            self.handle_item(item).await;
        }

        let counts = self.counts;
        info!(
            page = page_index,
            total = total_so_far,
            created = counts.created,
            updated = counts.updated,
            skipped = counts.skipped,
            errors = counts.errors,
            "page processed"
        );
        self.status.emit(StatusEvent::progress(
            format!(
                "Processed {} bookmarks ({} ok, {} skipped, {} errors)",
                total_so_far,
                counts.success_count() + counts.unchanged,
                counts.skipped,
                counts.errors
            ),
            SyncPhase::FetchingItems,
        ));
        PageControl::Continue
    }
}
