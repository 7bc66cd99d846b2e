//! Tests for `detect_changes` against the SQLite bookmark store.

#[path = "../support/mod.rs"]
mod support;

use raindrop_sync::services::change_detector::detect_changes;
use raindrop_sync::types::status::SyncReason;

use support::{item, Harness};

const ROOT: &str = "Raindrop";

#[tokio::test]
async fn test_missing_root_needs_sync_without_remote_read() {
    let h = Harness::new();
    h.remote.reject_token(true);

    let decision = detect_changes(h.store.as_ref(), &*h.remote, &h.metadata, ROOT)
        .await
        .unwrap();

    assert!(decision.needed);
    assert_eq!(decision.reason, SyncReason::MissingLocalFolder);
    assert_eq!(decision.remote_latest, None);
}

#[tokio::test]
async fn test_empty_root_needs_sync() {
    let h = Harness::new();
    h.store.create_folder(&h.store.bookmarks_bar_id(), ROOT).await.unwrap();

    let decision = detect_changes(h.store.as_ref(), &*h.remote, &h.metadata, ROOT)
        .await
        .unwrap();

    assert!(decision.needed);
    assert_eq!(decision.reason, SyncReason::EmptyLocalFolder);
}

#[tokio::test]
async fn test_watermark_comparison_is_strict() {
    let h = Harness::new();
    let root = h.store.create_folder(&h.store.bookmarks_bar_id(), ROOT).await.unwrap();
    h.store.create_folder(&root.id, "Unsorted").await.unwrap();
    h.remote
        .set_items(vec![item(1, "a", Some("https://a.example"), -1, 5_000)]);

    h.metadata.advance_last_sync_timestamp(5_000).await.unwrap();
    let decision = detect_changes(h.store.as_ref(), &*h.remote, &h.metadata, ROOT)
        .await
        .unwrap();
    assert!(!decision.needed);
    assert_eq!(decision.reason, SyncReason::UpToDate);
    assert_eq!(decision.remote_latest, Some(5_000));

    h.remote
        .set_items(vec![item(1, "a", Some("https://a.example"), -1, 5_001)]);
    let decision = detect_changes(h.store.as_ref(), &*h.remote, &h.metadata, ROOT)
        .await
        .unwrap();
    assert!(decision.needed);
    assert_eq!(decision.reason, SyncReason::NewChanges);
}

#[tokio::test]
async fn test_trash_activity_counts_as_change() {
    let h = Harness::new();
    let root = h.store.create_folder(&h.store.bookmarks_bar_id(), ROOT).await.unwrap();
    h.store.create_folder(&root.id, "Unsorted").await.unwrap();
    h.metadata.advance_last_sync_timestamp(5_000).await.unwrap();
    h.remote
        .set_items(vec![item(1, "a", Some("https://a.example"), -1, 4_000)]);
    h.remote
        .set_trash(vec![item(2, "b", Some("https://b.example"), -99, 6_000)]);

    let decision = detect_changes(h.store.as_ref(), &*h.remote, &h.metadata, ROOT)
        .await
        .unwrap();
    assert!(decision.needed);
    assert_eq!(decision.remote_latest, Some(6_000));
}

#[tokio::test]
async fn test_no_remote_items_skips() {
    let h = Harness::new();
    let root = h.store.create_folder(&h.store.bookmarks_bar_id(), ROOT).await.unwrap();
    h.store.create_folder(&root.id, "Unsorted").await.unwrap();

    let decision = detect_changes(h.store.as_ref(), &*h.remote, &h.metadata, ROOT)
        .await
        .unwrap();
    assert!(!decision.needed);
    assert_eq!(decision.reason, SyncReason::NoRemoteItems);
}

#[tokio::test]
async fn test_remote_failure_propagates_once_root_is_populated() {
    let h = Harness::new();
    let root = h.store.create_folder(&h.store.bookmarks_bar_id(), ROOT).await.unwrap();
    h.store.create_folder(&root.id, "Unsorted").await.unwrap();
    h.remote.reject_token(true);

    let err = detect_changes(h.store.as_ref(), &*h.remote, &h.metadata, ROOT)
        .await
        .unwrap_err();
    assert!(err.is_auth_failure());
}
