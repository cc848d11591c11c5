// # Memory Store
//
// In-memory implementation of RelationStore, RegistrationStore and
// ProfileStore.
//
// ## Purpose
//
// Provides a simple, fast store that doesn't persist across restarts.
// Useful for testing and for deployments where history is exported
// elsewhere.
//
// ## Crash Behavior
//
// - All state is lost on restart/crash
// - The first cycle after a restart reports every current target as
//   appeared

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::relation_store::sort_time_desc;
use crate::traits::{
    ProfileStore, RegistrationStore, Relation, RelationChange, RelationStore, RelationType,
    UserProfile,
};

/// Everything a store holds, shared by the memory and file stores
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct StoreData {
    pub(crate) relations: HashSet<Relation>,
    pub(crate) changes: Vec<RelationChange>,
    pub(crate) next_change_id: u64,
    pub(crate) registrations: BTreeSet<i64>,
    pub(crate) profiles: HashMap<i64, UserProfile>,
}

impl StoreData {
    pub(crate) fn targets(&self, owner_id: i64, relation_type: RelationType) -> HashSet<i64> {
        self.relations
            .iter()
            .filter(|r| r.owner_id == owner_id && r.relation_type == relation_type)
            .map(|r| r.target_id)
            .collect()
    }

    /// Log `change` under the next id
    ///
    /// Times never go backwards in the log, even if the wall clock does, so
    /// newest-first listings stay in the order the changes happened.
    pub(crate) fn append(&mut self, mut change: RelationChange) -> RelationChange {
        if let Some(last) = self.changes.last()
            && change.time < last.time
        {
            change.time = last.time;
        }
        self.next_change_id += 1;
        change.id = self.next_change_id;
        self.changes.push(change.clone());
        change
    }

    pub(crate) fn transition(
        &mut self,
        relation: &Relation,
        is_appeared: bool,
        time: DateTime<Utc>,
    ) -> RelationChange {
        let change = self.append(RelationChange::new(relation, is_appeared, time));
        if is_appeared {
            self.relations.insert(*relation);
        } else {
            self.relations.remove(relation);
        }
        change
    }

    pub(crate) fn changes_where(&self, keep: impl Fn(&RelationChange) -> bool) -> Vec<RelationChange> {
        let mut changes: Vec<RelationChange> =
            self.changes.iter().filter(|c| keep(c)).cloned().collect();
        sort_time_desc(&mut changes);
        changes
    }

    pub(crate) fn missing_profiles(&self, ids: &[i64]) -> Vec<i64> {
        let mut seen = HashSet::new();
        ids.iter()
            .copied()
            .filter(|id| !self.profiles.contains_key(id) && seen.insert(*id))
            .collect()
    }
}

/// In-memory store implementation
///
/// All state lives in one map set behind a `RwLock`, so every transition
/// (change event plus edge update) happens under a single write lock.
///
/// # Example
///
/// ```rust,no_run
/// use relwatch_core::state::MemoryStore;
/// use relwatch_core::traits::{Relation, RelationStore, RelationType};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStore::new();
///
///     let relation = Relation::new(1, 2, RelationType::Friend);
///     store.record_transition(&relation, true, chrono::Utc::now()).await?;
///
///     let targets = store.find_targets(1, RelationType::Friend).await?;
///     assert!(targets.contains(&2));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<StoreData>>,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live relations across all owners
    pub async fn relation_count(&self) -> usize {
        self.inner.read().await.relations.len()
    }

    /// Number of logged changes across all owners
    pub async fn change_count(&self) -> usize {
        self.inner.read().await.changes.len()
    }
}

#[async_trait]
impl RelationStore for MemoryStore {
    async fn find_targets(
        &self,
        owner_id: i64,
        relation_type: RelationType,
    ) -> Result<HashSet<i64>, Error> {
        Ok(self.inner.read().await.targets(owner_id, relation_type))
    }

    async fn add_relation(&self, relation: &Relation) -> Result<(), Error> {
        self.inner.write().await.relations.insert(*relation);
        Ok(())
    }

    async fn remove_relation(&self, relation: &Relation) -> Result<(), Error> {
        self.inner.write().await.relations.remove(relation);
        Ok(())
    }

    async fn append_change(&self, change: RelationChange) -> Result<RelationChange, Error> {
        Ok(self.inner.write().await.append(change))
    }

    async fn list_changes_by_owner(&self, owner_id: i64) -> Result<Vec<RelationChange>, Error> {
        Ok(self
            .inner
            .read()
            .await
            .changes_where(|c| c.owner_id == owner_id))
    }

    async fn list_all_changes(&self) -> Result<Vec<RelationChange>, Error> {
        Ok(self.inner.read().await.changes_where(|_| true))
    }

    async fn record_transition(
        &self,
        relation: &Relation,
        is_appeared: bool,
        time: DateTime<Utc>,
    ) -> Result<RelationChange, Error> {
        Ok(self
            .inner
            .write()
            .await
            .transition(relation, is_appeared, time))
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing buffered
        Ok(())
    }
}

#[async_trait]
impl RegistrationStore for MemoryStore {
    async fn add(&self, owner_id: i64) -> Result<(), Error> {
        self.inner.write().await.registrations.insert(owner_id);
        Ok(())
    }

    async fn remove(&self, owner_id: i64) -> Result<(), Error> {
        self.inner.write().await.registrations.remove(&owner_id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<i64>, Error> {
        Ok(self.inner.read().await.registrations.iter().copied().collect())
    }

    async fn contains(&self, owner_id: i64) -> Result<bool, Error> {
        Ok(self.inner.read().await.registrations.contains(&owner_id))
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn missing(&self, ids: &[i64]) -> Result<Vec<i64>, Error> {
        Ok(self.inner.read().await.missing_profiles(ids))
    }

    async fn save_all(&self, profiles: &[UserProfile]) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        for profile in profiles {
            guard.profiles.insert(profile.id, profile.clone());
        }
        Ok(())
    }

    async fn find(&self, id: i64) -> Result<Option<UserProfile>, Error> {
        Ok(self.inner.read().await.profiles.get(&id).cloned())
    }
}
