//! Property-based tests for the pure sync predicate.

use proptest::prelude::*;

use raindrop_sync::services::change_detector::should_sync;
use raindrop_sync::types::status::SyncReason;

proptest! {
    #[test]
    fn equal_timestamp_never_syncs(ts in 0i64..i64::MAX) {
        let decision = should_sync(Some(ts), ts, true, true);
        prop_assert!(!decision.needed);
        prop_assert_eq!(decision.reason, SyncReason::UpToDate);
    }

    #[test]
    fn strictly_newer_always_syncs(last in 0i64..i64::MAX - 1, delta in 1i64..1_000_000) {
        let remote = last.saturating_add(delta);
        prop_assume!(remote > last);
        let decision = should_sync(Some(remote), last, true, true);
        prop_assert!(decision.needed);
        prop_assert_eq!(decision.reason, SyncReason::NewChanges);
        prop_assert_eq!(decision.remote_latest, Some(remote));
    }

    #[test]
    fn older_remote_never_syncs(remote in 0i64..1_000_000, delta in 0i64..1_000_000) {
        let decision = should_sync(Some(remote), remote + delta, true, true);
        prop_assert!(!decision.needed);
    }

    #[test]
    fn missing_root_always_syncs(
        remote in proptest::option::of(0i64..1_000_000),
        last in 0i64..1_000_000,
        non_empty in any::<bool>(),
    ) {
        let decision = should_sync(remote, last, false, non_empty);
        prop_assert!(decision.needed);
        prop_assert_eq!(decision.reason, SyncReason::MissingLocalFolder);
    }

    #[test]
    fn empty_root_always_syncs(remote in proptest::option::of(0i64..1_000_000), last in 0i64..1_000_000) {
        let decision = should_sync(remote, last, true, false);
        prop_assert!(decision.needed);
        prop_assert_eq!(decision.reason, SyncReason::EmptyLocalFolder);
    }

    #[test]
    fn no_remote_items_never_syncs_a_populated_root(last in 0i64..1_000_000) {
        let decision = should_sync(None, last, true, true);
        prop_assert!(!decision.needed);
        prop_assert_eq!(decision.reason, SyncReason::NoRemoteItems);
    }
}
