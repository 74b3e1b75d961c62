//! Replicated Map Tests
//!
//! ## Test Scopes
//! - **Merge policies**: Winner selection, including the tie rule.
//! - **ReplicatedRecordStore**: Version counter semantics, TTL, merge path, snapshots.
//! - **ReplicatedMapService**: Per-map policy selection.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::{MergePolicyKind, ReplicatedMapConfig};
    use crate::replicated::merge::{
        HigherHitsMapMergePolicy, LatestUpdateMapMergePolicy, MergePolicy,
        PassThroughMergePolicy, PutIfAbsentMapMergePolicy, policy_for,
    };
    use crate::replicated::record::ReplicatedEntryView;
    use crate::replicated::service::ReplicatedMapService;
    use crate::replicated::store::{ReplicatedRecordStore, SyncDecision};

    fn view(key: &str, value: &str, last_update_time: u64, hits: u64) -> ReplicatedEntryView<String, String> {
        ReplicatedEntryView {
            key: key.to_string(),
            value: value.to_string(),
            creation_time: 1,
            last_access_time: last_update_time,
            last_update_time,
            hits,
            ttl_millis: 0,
        }
    }

    fn store() -> ReplicatedRecordStore<String, String> {
        ReplicatedRecordStore::new("dict", Arc::new(LatestUpdateMapMergePolicy))
    }

    // ============================================================
    // MERGE POLICY TESTS
    // ============================================================

    #[test]
    fn test_latest_update_picks_newer() {
        let policy = LatestUpdateMapMergePolicy;

        let newer = view("k", "incoming", 200, 0);
        let older = view("k", "existing", 100, 0);
        assert_eq!(policy.merge("dict", &newer, &older), "incoming");

        let older_incoming = view("k", "incoming", 100, 0);
        let newer_existing = view("k", "existing", 200, 0);
        assert_eq!(policy.merge("dict", &older_incoming, &newer_existing), "existing");
    }

    #[test]
    fn test_latest_update_tie_goes_to_incoming() {
        let policy = LatestUpdateMapMergePolicy;
        let merging = view("k", "incoming", 150, 0);
        let existing = view("k", "existing", 150, 0);

        assert_eq!(policy.merge("dict", &merging, &existing), "incoming");
    }

    #[test]
    fn test_other_policies() {
        let merging = view("k", "incoming", 100, 1);
        let existing = view("k", "existing", 200, 5);

        assert_eq!(PassThroughMergePolicy.merge("dict", &merging, &existing), "incoming");
        assert_eq!(PutIfAbsentMapMergePolicy.merge("dict", &merging, &existing), "existing");
        assert_eq!(HigherHitsMapMergePolicy.merge("dict", &merging, &existing), "existing");

        let popular = view("k", "incoming", 100, 9);
        assert_eq!(HigherHitsMapMergePolicy.merge("dict", &popular, &existing), "incoming");
    }

    #[test]
    fn test_policy_for_kind() {
        let merging = view("k", "incoming", 100, 0);
        let existing = view("k", "existing", 200, 0);

        let policy = policy_for::<String, String>(MergePolicyKind::PassThrough);
        assert_eq!(policy.merge("dict", &merging, &existing), "incoming");

        let policy = policy_for::<String, String>(MergePolicyKind::LatestUpdate);
        assert_eq!(policy.merge("dict", &merging, &existing), "existing");
    }

    // ============================================================
    // VERSION COUNTER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_structural_mutations_bump_version() {
        let store = store();
        assert_eq!(store.version(), 0);

        assert_eq!(store.put("a".to_string(), "1".to_string()), None);
        assert_eq!(store.put("a".to_string(), "2".to_string()), Some("1".to_string()));
        assert_eq!(store.version(), 2);

        assert_eq!(store.remove(&"a".to_string()), Some("2".to_string()));
        assert_eq!(store.version(), 3);

        assert_eq!(store.remove(&"missing".to_string()), None);
        assert_eq!(store.version(), 3, "Removing nothing is not a mutation");

        store.put("b".to_string(), "1".to_string());
        store.clear();
        assert_eq!(store.version(), 5);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_evict_does_not_bump_version() {
        let store = store();
        store.put("a".to_string(), "1".to_string());

        assert!(store.evict(&"a".to_string()));
        assert_eq!(store.version(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_does_not_bump_version() {
        // ARRANGE
        let store = store();
        store.put_with_ttl("k".to_string(), "v".to_string(), Duration::from_secs(2), false);
        assert_eq!(store.version(), 1);

        // ACT
        tokio::time::sleep(Duration::from_secs(3)).await;

        // ASSERT
        assert!(!store.contains_key(&"k".to_string()), "Entry expired");
        assert_eq!(store.version(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_without_ttl_cancels_expiry() {
        let store = store();
        store.put_with_ttl("k".to_string(), "v1".to_string(), Duration::from_secs(2), false);
        store.put("k".to_string(), "v2".to_string());

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(store.get(&"k".to_string()), Some("v2".to_string()));
        assert!(!store.cancel_ttl_entry(&"k".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_merged_ttl_entry_expires() {
        let store = store();
        let mut incoming = view("k", "remote", 100, 0);
        incoming.ttl_millis = 2000;

        assert!(store.put_record(incoming));
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(store.contains_key(&"k".to_string()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!store.contains_key(&"k".to_string()));
    }

    #[tokio::test]
    async fn test_reset_returns_to_version_zero() {
        let store = store();
        store.put("a".to_string(), "1".to_string());
        store.set_loaded(true);

        store.reset();

        assert_eq!(store.version(), 0);
        assert!(!store.is_loaded());
        assert!(store.is_empty());
    }

    // ============================================================
    // MERGE PATH TESTS
    // ============================================================

    #[tokio::test]
    async fn test_merge_into_absent_key_inserts() {
        let store = store();

        assert!(store.put_record(view("k", "remote", 100, 3)));

        let record = store.get_replicated_record(&"k".to_string()).unwrap();
        assert_eq!(record.value, "remote");
        assert_eq!(record.last_update_time, 100);
        assert_eq!(record.hits, 3);
        assert_eq!(store.version(), 1);
    }

    #[tokio::test]
    async fn test_merge_keeps_newer_local_entry() {
        let store = store();
        store.put("k".to_string(), "local".to_string());
        let version = store.version();

        // Timestamps of 1ms are always older than a fresh local put.
        assert!(!store.put_record(view("k", "remote", 1, 0)));

        assert_eq!(store.get(&"k".to_string()), Some("local".to_string()));
        assert_eq!(store.version(), version, "No change, no bump");
    }

    #[tokio::test]
    async fn test_merge_tie_takes_incoming_and_bumps_version() {
        let store = store();
        store.put_record(view("k", "local", 500, 0));

        assert!(store.put_record(view("k", "remote", 500, 0)));

        assert_eq!(store.get(&"k".to_string()), Some("remote".to_string()));
        assert_eq!(store.version(), 2);
    }

    #[tokio::test]
    async fn test_merge_with_explicit_policy() {
        let store = store();
        store.put_record(view("k", "local", 500, 0));

        assert!(!store.merge(view("k", "remote", 900, 0), &PutIfAbsentMapMergePolicy));
        assert_eq!(store.get(&"k".to_string()), Some("local".to_string()));
    }

    // ============================================================
    // SNAPSHOT / RESYNC TESTS
    // ============================================================

    #[tokio::test]
    async fn test_stale_copy_requests_full_resync() {
        let leader = store();
        leader.put("a".to_string(), "1".to_string());
        leader.put("b".to_string(), "2".to_string());

        let follower = store();
        follower.put("stale".to_string(), "x".to_string());

        assert_eq!(
            follower.sync_decision(leader.version(), leader.digest()),
            SyncDecision::FullResync
        );
        assert_eq!(
            leader.sync_decision(follower.version(), follower.digest()),
            SyncDecision::UpToDate
        );

        let (version, records) = leader.snapshot();
        follower.apply_snapshot(version, records);

        assert_eq!(follower.version(), 2);
        assert!(follower.is_loaded());
        let mut keys = follower.key_set();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_diverged_copies_at_same_version_converge() {
        // ARRANGE: both copies hold k1 and k9 with identical metadata
        let a = store();
        let b = store();
        for copy in [&a, &b] {
            copy.put_record(view("k1", "one", 100, 0));
            copy.put_record(view("k9", "nine", 100, 0));
        }
        assert_eq!(a.digest(), b.digest());

        // ACT: each side removes a different key
        b.remove(&"k1".to_string());
        a.remove(&"k9".to_string());

        // ASSERT: same version, different contents, exactly one side pulls
        assert_eq!(a.version(), 3);
        assert_eq!(b.version(), 3);
        assert_ne!(a.digest(), b.digest());

        let a_pulls = a.sync_decision(b.version(), b.digest()) == SyncDecision::FullResync;
        let b_pulls = b.sync_decision(a.version(), a.digest()) == SyncDecision::FullResync;
        assert!(a_pulls != b_pulls, "Exactly one copy resynchronizes");

        let (source, target) = if a_pulls { (&b, &a) } else { (&a, &b) };
        let (version, records) = source.snapshot();
        target.apply_snapshot(version, records);

        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.key_set(), b.key_set());
        assert_eq!(a.sync_decision(b.version(), b.digest()), SyncDecision::UpToDate);
        assert_eq!(b.sync_decision(a.version(), a.digest()), SyncDecision::UpToDate);
    }

    #[tokio::test]
    async fn test_equal_copies_at_same_version_stay_put() {
        let a = store();
        let b = store();
        for copy in [&a, &b] {
            copy.put_record(view("k", "v", 100, 0));
        }
        a.get(&"k".to_string());

        assert_eq!(a.sync_decision(b.version(), b.digest()), SyncDecision::UpToDate);
        assert_eq!(b.sync_decision(a.version(), a.digest()), SyncDecision::UpToDate);
    }

    #[tokio::test]
    async fn test_collection_views() {
        let store = store();
        store.put("a".to_string(), "3".to_string());
        store.put("b".to_string(), "1".to_string());
        store.put("c".to_string(), "2".to_string());

        assert_eq!(store.values_sorted(|x, y| x.cmp(y)), vec!["1", "2", "3"]);
        assert!(store.contains_value(&"2".to_string()));
        assert!(!store.contains_value(&"9".to_string()));
        assert_eq!(store.entry_set().len(), 3);
        assert_eq!(store.records().len(), 3);
        assert_eq!(store.size(), 3);
    }

    // ============================================================
    // SERVICE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_service_uses_configured_policy() {
        let service = ReplicatedMapService::<String, String>::new(ReplicatedMapConfig::default());
        service.configure(
            "sticky",
            ReplicatedMapConfig {
                merge_policy: MergePolicyKind::PutIfAbsent,
            },
        );

        service.put_record("sticky", view("k", "first", 100, 0));
        service.put_record("sticky", view("k", "second", 900, 0));
        service.put_record("latest", view("k", "first", 100, 0));
        service.put_record("latest", view("k", "second", 900, 0));

        let sticky = service.get("sticky").unwrap();
        let latest = service.get("latest").unwrap();
        assert_eq!(sticky.get(&"k".to_string()), Some("first".to_string()));
        assert_eq!(latest.get(&"k".to_string()), Some("second".to_string()));

        assert!(service.remove_record("latest", &"k".to_string()));
        assert!(!service.remove_record("latest", &"k".to_string()));
        assert!(latest.is_empty());

        assert!(service.destroy("sticky"));
        assert!(service.get("sticky").is_none());
        assert_eq!(service.map_names(), vec!["latest".to_string()]);
    }
}
