//! Contract Test: Snapshot Diff Correctness
//!
//! This test verifies that one reconciliation run turns two snapshots into
//! exactly the right appeared/disappeared events and edge updates.
//!
//! Constraints verified:
//! - appeared = current - previous, disappeared = previous - current
//! - Each appeared id gets one event and one new edge; each disappeared id
//!   gets one event and loses its edge
//! - Owners and relation types never see each other's data
//!
//! If this test fails, recorded history no longer matches the provider.

mod common;

use common::*;
use relwatch_core::engine::{CycleOutcome, SnapshotDiff};
use relwatch_core::traits::{RelationStore, RelationType};
use std::collections::HashSet;
use std::time::Duration;
use tokio_test::assert_ok;

const OWNER: i64 = 100;

#[tokio::test]
async fn first_run_reports_every_target_as_appeared() {
    let harness = Harness::new(Duration::ZERO);
    harness
        .provider
        .set_snapshot(OWNER, RelationType::Friend, &[1, 2, 3]);

    let outcome = harness.engine.run(OWNER, RelationType::Friend).await;

    assert_eq!(
        outcome,
        CycleOutcome::Completed {
            owner_id: OWNER,
            relation_type: RelationType::Friend,
            diff: SnapshotDiff {
                appeared: vec![1, 2, 3],
                disappeared: vec![],
            },
        }
    );
    assert_eq!(harness.store.change_count().await, 3);
}

#[tokio::test]
async fn membership_shift_yields_one_appearance_and_one_disappearance() {
    // Stored {1,2,3}, provider now reports {2,3,4}
    let harness = Harness::new(Duration::ZERO);
    harness
        .provider
        .set_snapshot(OWNER, RelationType::Friend, &[1, 2, 3]);
    harness.engine.run(OWNER, RelationType::Friend).await;

    harness
        .provider
        .set_snapshot(OWNER, RelationType::Friend, &[2, 3, 4]);
    let outcome = harness.engine.run(OWNER, RelationType::Friend).await;

    let CycleOutcome::Completed { diff, .. } = outcome else {
        panic!("expected a completed cycle, got {:?}", outcome);
    };
    assert_eq!(diff.appeared, vec![4]);
    assert_eq!(diff.disappeared, vec![1]);

    let latest: Vec<_> = history(&harness.store, OWNER, RelationType::Friend)
        .await
        .into_iter()
        .skip(3)
        .map(|c| (c.target_id, c.is_appeared))
        .collect();
    assert_eq!(latest, vec![(4, true), (1, false)]);

    let live = assert_ok!(harness.store.find_targets(OWNER, RelationType::Friend).await);
    assert_eq!(live, HashSet::from([2, 3, 4]));
}

#[tokio::test]
async fn empty_to_empty_completes_without_writes() {
    let harness = Harness::new(Duration::ZERO);

    let outcome = harness.engine.run(OWNER, RelationType::Follower).await;

    assert!(outcome.is_completed());
    assert_eq!(harness.store.change_count().await, 0);
    assert_eq!(harness.store.relation_count().await, 0);
}

#[tokio::test]
async fn losing_every_target_removes_every_edge() {
    let harness = Harness::new(Duration::ZERO);
    harness
        .provider
        .set_snapshot(OWNER, RelationType::Friend, &[5, 6]);
    harness.engine.run(OWNER, RelationType::Friend).await;

    harness.provider.set_snapshot(OWNER, RelationType::Friend, &[]);
    harness.engine.run(OWNER, RelationType::Friend).await;

    assert_eq!(harness.store.relation_count().await, 0);
    let disappeared: Vec<i64> = history(&harness.store, OWNER, RelationType::Friend)
        .await
        .into_iter()
        .filter(|c| !c.is_appeared)
        .map(|c| c.target_id)
        .collect();
    assert_eq!(disappeared, vec![5, 6]);
}

#[tokio::test]
async fn a_returning_target_is_logged_again() {
    let harness = Harness::new(Duration::ZERO);
    for snapshot in [&[7][..], &[][..], &[7][..]] {
        harness
            .provider
            .set_snapshot(OWNER, RelationType::Friend, snapshot);
        harness.engine.run(OWNER, RelationType::Friend).await;
    }

    let events: Vec<bool> = history(&harness.store, OWNER, RelationType::Friend)
        .await
        .into_iter()
        .map(|c| c.is_appeared)
        .collect();
    assert_eq!(events, vec![true, false, true]);
}

#[tokio::test]
async fn relation_types_are_diffed_independently() {
    let harness = Harness::new(Duration::ZERO);
    harness
        .provider
        .set_snapshot(OWNER, RelationType::Friend, &[1, 2]);
    harness
        .provider
        .set_snapshot(OWNER, RelationType::Follower, &[2, 3]);

    harness.engine.run(OWNER, RelationType::Friend).await;
    harness.engine.run(OWNER, RelationType::Follower).await;

    assert_eq!(
        harness
            .store
            .find_targets(OWNER, RelationType::Friend)
            .await
            .unwrap(),
        HashSet::from([1, 2])
    );
    assert_eq!(
        harness
            .store
            .find_targets(OWNER, RelationType::Follower)
            .await
            .unwrap(),
        HashSet::from([2, 3])
    );
    assert_eq!(harness.store.change_count().await, 4);
}

#[tokio::test]
async fn owners_do_not_share_snapshots() {
    let harness = Harness::new(Duration::ZERO);
    harness.provider.set_snapshot(1, RelationType::Friend, &[10]);
    harness.provider.set_snapshot(2, RelationType::Friend, &[20]);

    harness.engine.run(1, RelationType::Friend).await;
    harness.engine.run(2, RelationType::Friend).await;

    let owner_one = harness.store.list_changes_by_owner(1).await.unwrap();
    assert_eq!(owner_one.len(), 1);
    assert_eq!(owner_one[0].target_id, 10);
    assert_eq!(harness.store.list_all_changes().await.unwrap().len(), 2);
}

#[tokio::test]
async fn profiles_are_cached_for_new_targets() {
    let harness = Harness::new(Duration::ZERO);
    harness
        .provider
        .set_snapshot(OWNER, RelationType::Friend, &[1, 2]);

    harness.engine.run(OWNER, RelationType::Friend).await;

    let profile = harness.source.get_profile(2).await.unwrap();
    assert_eq!(profile.map(|p| p.first_name), Some("User2".to_string()));
    assert_eq!(harness.provider.profile_call_count(), 1);
}
