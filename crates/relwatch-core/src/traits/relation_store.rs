// # Relation Store Trait
//
// Defines the persistence interface for live relation edges and the
// append-only change log.
//
// ## Purpose
//
// The store provides the "previous snapshot" for a reconciliation cycle
// and receives the diff as a series of transitions. The change log is the
// write-ahead record: replaying it in time order reconstructs exactly the
// live relation set.
//
// ## Implementations
//
// - `MemoryStore`: maps behind a `RwLock`
// - `FileStore`: JSON file with atomic writes and backup recovery

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Kind of connection being tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    /// Mutual friendship
    Friend,
    /// One-way follow of the owner
    Follower,
}

impl RelationType {
    /// Every relation type, in a stable order
    pub const ALL: [RelationType; 2] = [RelationType::Friend, RelationType::Follower];

    /// Lowercase name used in configuration and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Friend => "friend",
            RelationType::Follower => "follower",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "friend" | "friends" => Ok(RelationType::Friend),
            "follower" | "followers" => Ok(RelationType::Follower),
            other => Err(crate::Error::invalid_input(format!(
                "Unknown relation type '{}'. Valid: friend, follower",
                other
            ))),
        }
    }
}

/// A live edge: `target_id` currently holds `relation_type` towards `owner_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub owner_id: i64,
    pub target_id: i64,
    pub relation_type: RelationType,
}

impl Relation {
    pub fn new(owner_id: i64, target_id: i64, relation_type: RelationType) -> Self {
        Self {
            owner_id,
            target_id,
            relation_type,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} of {}",
            self.target_id, self.relation_type, self.owner_id
        )
    }
}

/// One historical transition of a relation
///
/// Immutable once appended. `id` is assigned by the store on append; the
/// value passed to [`RelationStore::append_change`] is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationChange {
    pub id: u64,
    pub time: DateTime<Utc>,
    pub owner_id: i64,
    pub target_id: i64,
    pub relation_type: RelationType,
    pub is_appeared: bool,
}

impl RelationChange {
    /// Build an unsaved change for `relation`
    pub fn new(relation: &Relation, is_appeared: bool, time: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            time,
            owner_id: relation.owner_id,
            target_id: relation.target_id,
            relation_type: relation.relation_type,
            is_appeared,
        }
    }
}

/// Sort changes newest first; ties broken by id, newest first
pub(crate) fn sort_time_desc(changes: &mut [RelationChange]) {
    changes.sort_by(|a, b| b.time.cmp(&a.time).then(b.id.cmp(&a.id)));
}

/// Trait for relation store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
/// Disjoint owners touch disjoint keys, so no cross-owner locking is
/// required beyond what the implementation does naturally.
///
/// # Trust Level: Trusted (Core Component)
///
/// Stores persist what they are told. They never decide what changed;
/// that is owned by `ReconciliationEngine`.
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Target ids currently recorded live for `(owner_id, relation_type)`
    async fn find_targets(
        &self,
        owner_id: i64,
        relation_type: RelationType,
    ) -> Result<HashSet<i64>, crate::Error>;

    /// Record a live edge. Adding an existing edge is a no-op.
    async fn add_relation(&self, relation: &Relation) -> Result<(), crate::Error>;

    /// Delete a live edge. Removing a missing edge is a no-op.
    async fn remove_relation(&self, relation: &Relation) -> Result<(), crate::Error>;

    /// Append a change event and return it as stored
    ///
    /// Log times must not decrease: a change timed before the latest logged
    /// one is stored with the latest time, so listings keep log order even
    /// if the wall clock was set back.
    async fn append_change(&self, change: RelationChange) -> Result<RelationChange, crate::Error>;

    /// Changes for one owner, newest first
    async fn list_changes_by_owner(&self, owner_id: i64)
    -> Result<Vec<RelationChange>, crate::Error>;

    /// Every change, newest first
    async fn list_all_changes(&self) -> Result<Vec<RelationChange>, crate::Error>;

    /// Apply one transition: log the change, then add or remove the edge
    ///
    /// This pair is the unit of atomicity. The default implementation writes
    /// the log entry first, so a failure between the two writes leaves the
    /// edge set behind the log; the next cycle sees the same difference and
    /// repeats the transition, which replays to the same set. Implementations
    /// that can do both writes under one lock should override this.
    async fn record_transition(
        &self,
        relation: &Relation,
        is_appeared: bool,
        time: DateTime<Utc>,
    ) -> Result<RelationChange, crate::Error> {
        let change = self
            .append_change(RelationChange::new(relation, is_appeared, time))
            .await?;
        if is_appeared {
            self.add_relation(relation).await?;
        } else {
            self.remove_relation(relation).await?;
        }
        Ok(change)
    }

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
