//! Test doubles and common utilities for contract tests
//!
//! This module provides scripted collaborators that let the contract tests
//! drive the engine and scheduler without a real provider.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relwatch_core::config::WatchConfig;
use relwatch_core::engine::ReconciliationEngine;
use relwatch_core::error::{Error, Result};
use relwatch_core::gateway::RateLimitedGateway;
use relwatch_core::source::MembershipSource;
use relwatch_core::state::MemoryStore;
use relwatch_core::traits::{
    ConnectionPage, ProviderClient, Relation, RelationChange, RelationStore, RelationType,
    UserProfile,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// A provider whose listings are set by the test
///
/// Listings default to empty. Every call is counted and its start time is
/// recorded, so tests can check call volume and spacing.
#[derive(Default)]
pub struct ScriptedProvider {
    snapshots: Mutex<HashMap<(i64, RelationType), Vec<i64>>>,
    failing_owners: Mutex<HashSet<i64>>,
    fail_profiles: AtomicBool,
    /// Simulated duration of every call
    latency: Mutex<Duration>,
    list_calls: AtomicUsize,
    profile_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    call_starts: Mutex<Vec<Instant>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current listing of `owner_id` for `relation_type`
    pub fn set_snapshot(&self, owner_id: i64, relation_type: RelationType, ids: &[i64]) {
        self.snapshots
            .lock()
            .unwrap()
            .insert((owner_id, relation_type), ids.to_vec());
    }

    /// Make every listing call for `owner_id` fail (or succeed again)
    pub fn set_owner_failing(&self, owner_id: i64, failing: bool) {
        let mut failing_owners = self.failing_owners.lock().unwrap();
        if failing {
            failing_owners.insert(owner_id);
        } else {
            failing_owners.remove(&owner_id);
        }
    }

    /// Make every profile call fail (or succeed again)
    pub fn set_profiles_failing(&self, failing: bool) {
        self.fail_profiles.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Number of listing calls made
    pub fn list_call_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of profile calls made
    pub fn profile_call_count(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    /// Total number of provider calls made
    pub fn total_call_count(&self) -> usize {
        self.list_call_count() + self.profile_call_count()
    }

    /// Highest number of calls that were in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Start times of every call, in call order
    pub fn call_starts(&self) -> Vec<Instant> {
        self.call_starts.lock().unwrap().clone()
    }

    async fn enter(&self) -> CallGuard<'_> {
        self.call_starts.lock().unwrap().push(Instant::now());
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        let guard = CallGuard {
            in_flight: &self.in_flight,
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        guard
    }
}

struct CallGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn list_connections(
        &self,
        owner_id: i64,
        relation_type: RelationType,
        offset: usize,
    ) -> Result<ConnectionPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let _call = self.enter().await;

        if self.failing_owners.lock().unwrap().contains(&owner_id) {
            return Err(Error::provider_unavailable(format!(
                "scripted outage for {}",
                owner_id
            )));
        }

        let ids = self
            .snapshots
            .lock()
            .unwrap()
            .get(&(owner_id, relation_type))
            .cloned()
            .unwrap_or_default();
        Ok(ConnectionPage {
            total: ids.len(),
            ids: ids.get(offset..).unwrap_or_default().to_vec(),
        })
    }

    async fn fetch_profiles(&self, ids: &[i64]) -> Result<Vec<UserProfile>> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        let _call = self.enter().await;

        if self.fail_profiles.load(Ordering::SeqCst) {
            return Err(Error::provider_unavailable("scripted profile outage"));
        }
        Ok(ids
            .iter()
            .map(|id| UserProfile::new(*id, format!("User{}", id), "Test"))
            .collect())
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// A RelationStore wrapper that starts failing writes after a budget
///
/// Reads and the first `write_budget` transitions pass through to the
/// wrapped MemoryStore; later transitions fail without touching it.
pub struct FailingStore {
    inner: MemoryStore,
    write_budget: AtomicUsize,
    fail_reads: AtomicBool,
}

impl FailingStore {
    pub fn new(inner: MemoryStore, write_budget: usize) -> Self {
        Self {
            inner,
            write_budget: AtomicUsize::new(write_budget),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub fn set_reads_failing(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::SeqCst);
    }

    pub fn set_write_budget(&self, budget: usize) {
        self.write_budget.store(budget, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::store_unavailable("scripted read failure"));
        }
        Ok(())
    }

    fn take_write(&self) -> Result<()> {
        self.write_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .map(|_| ())
            .map_err(|_| Error::store_unavailable("scripted write failure"))
    }
}

#[async_trait]
impl RelationStore for FailingStore {
    async fn find_targets(
        &self,
        owner_id: i64,
        relation_type: RelationType,
    ) -> Result<HashSet<i64>> {
        self.check_read()?;
        self.inner.find_targets(owner_id, relation_type).await
    }

    async fn add_relation(&self, relation: &Relation) -> Result<()> {
        self.take_write()?;
        self.inner.add_relation(relation).await
    }

    async fn remove_relation(&self, relation: &Relation) -> Result<()> {
        self.take_write()?;
        self.inner.remove_relation(relation).await
    }

    async fn append_change(&self, change: RelationChange) -> Result<RelationChange> {
        self.take_write()?;
        self.inner.append_change(change).await
    }

    async fn list_changes_by_owner(&self, owner_id: i64) -> Result<Vec<RelationChange>> {
        self.inner.list_changes_by_owner(owner_id).await
    }

    async fn list_all_changes(&self) -> Result<Vec<RelationChange>> {
        self.inner.list_all_changes().await
    }

    async fn record_transition(
        &self,
        relation: &Relation,
        is_appeared: bool,
        time: DateTime<Utc>,
    ) -> Result<RelationChange> {
        self.take_write()?;
        self.inner.record_transition(relation, is_appeared, time).await
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Everything a contract test needs, wired the way the daemon wires it
pub struct Harness {
    pub provider: Arc<ScriptedProvider>,
    pub store: MemoryStore,
    pub gateway: Arc<RateLimitedGateway>,
    pub source: Arc<MembershipSource>,
    pub engine: Arc<ReconciliationEngine>,
}

impl Harness {
    /// Harness over a MemoryStore
    pub fn new(min_delay: Duration) -> Self {
        let store = MemoryStore::new();
        Self::with_relations(min_delay, store.clone(), Arc::new(store))
    }

    /// Harness whose engine writes to `relations`; profiles go to `store`
    pub fn with_relations(
        min_delay: Duration,
        store: MemoryStore,
        relations: Arc<dyn RelationStore>,
    ) -> Self {
        let provider = Arc::new(ScriptedProvider::new());
        let gateway = Arc::new(RateLimitedGateway::new(min_delay));
        let source = Arc::new(MembershipSource::new(
            provider.clone(),
            gateway.clone(),
            Arc::new(store.clone()),
        ));
        let engine = Arc::new(ReconciliationEngine::new(source.clone(), relations));

        Self {
            provider,
            store,
            gateway,
            source,
            engine,
        }
    }
}

/// A WatchConfig with the given poll interval, watching friends only
pub fn friends_config(poll_interval_secs: u64) -> WatchConfig {
    let mut config = WatchConfig::default();
    config.scheduler.poll_interval_secs = poll_interval_secs;
    config.relation_types = vec![RelationType::Friend];
    config
}

/// Replay a change log (oldest first) into the set of live targets
pub fn replay(changes: &[RelationChange]) -> HashSet<i64> {
    let mut live = HashSet::new();
    for change in changes {
        if change.is_appeared {
            live.insert(change.target_id);
        } else {
            live.remove(&change.target_id);
        }
    }
    live
}

/// Change log of one owner and relation type, oldest first
pub async fn history(
    store: &dyn RelationStore,
    owner_id: i64,
    relation_type: RelationType,
) -> Vec<RelationChange> {
    let mut changes: Vec<RelationChange> = store
        .list_changes_by_owner(owner_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.relation_type == relation_type)
        .collect();
    changes.reverse();
    changes
}
