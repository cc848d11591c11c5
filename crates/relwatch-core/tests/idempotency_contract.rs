//! Contract Test: No-op Idempotence
//!
//! This test verifies that polling an unchanged relation is free of side
//! effects.
//!
//! Constraints verified:
//! - An unchanged snapshot produces zero change events and zero edge writes
//! - Known profiles are never requested again
//! - Persisted state prevents duplicate events after a restart
//!
//! If this test fails, every poll would grow the history.

mod common;

use common::*;
use relwatch_core::state::{FileStore, MemoryStore};
use relwatch_core::traits::{RelationStore, RelationType};
use std::sync::Arc;
use std::time::Duration;

const OWNER: i64 = 200;

#[tokio::test]
async fn unchanged_snapshot_writes_nothing() {
    let harness = Harness::new(Duration::ZERO);
    harness
        .provider
        .set_snapshot(OWNER, RelationType::Friend, &[1, 2, 3]);
    harness.engine.run(OWNER, RelationType::Friend).await;
    let changes_after_first = harness.store.change_count().await;

    for _ in 0..3 {
        let outcome = harness.engine.run(OWNER, RelationType::Friend).await;
        assert!(outcome.is_completed());
    }

    assert_eq!(harness.store.change_count().await, changes_after_first);
    assert_eq!(harness.store.relation_count().await, 3);
}

#[tokio::test]
async fn reordered_listing_counts_as_unchanged() {
    let harness = Harness::new(Duration::ZERO);
    harness
        .provider
        .set_snapshot(OWNER, RelationType::Follower, &[3, 1, 2]);
    harness.engine.run(OWNER, RelationType::Follower).await;

    harness
        .provider
        .set_snapshot(OWNER, RelationType::Follower, &[2, 3, 1, 1]);
    harness.engine.run(OWNER, RelationType::Follower).await;

    assert_eq!(harness.store.change_count().await, 3);
}

#[tokio::test]
async fn known_profiles_are_not_fetched_again() {
    let harness = Harness::new(Duration::ZERO);
    harness
        .provider
        .set_snapshot(OWNER, RelationType::Friend, &[1, 2]);

    harness.engine.run(OWNER, RelationType::Friend).await;
    harness.engine.run(OWNER, RelationType::Friend).await;

    assert_eq!(harness.provider.list_call_count(), 2);
    assert_eq!(harness.provider.profile_call_count(), 1);
}

#[tokio::test]
async fn restart_from_file_store_does_not_replay_appearances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relwatch.json");

    // First "run": record {1, 2}
    {
        let store = Arc::new(FileStore::new(&path).await.unwrap());
        let harness = Harness::with_relations(Duration::ZERO, MemoryStore::new(), store.clone());
        harness
            .provider
            .set_snapshot(OWNER, RelationType::Friend, &[1, 2]);
        harness.engine.run(OWNER, RelationType::Friend).await;
        store.flush().await.unwrap();
    }

    // Second "run": same snapshot plus one newcomer
    let store = Arc::new(FileStore::new(&path).await.unwrap());
    let harness = Harness::with_relations(Duration::ZERO, MemoryStore::new(), store.clone());
    harness
        .provider
        .set_snapshot(OWNER, RelationType::Friend, &[1, 2, 3]);
    harness.engine.run(OWNER, RelationType::Friend).await;

    let changes = store.list_changes_by_owner(OWNER).await.unwrap();
    assert_eq!(changes.len(), 3);
    assert_eq!(changes[0].target_id, 3);
    assert!(changes[0].is_appeared);
}
