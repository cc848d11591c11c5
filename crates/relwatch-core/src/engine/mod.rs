//! Reconciliation engine
//!
//! One run reconciles one `(owner, relation type)` pair:
//!
//! ```text
//! ┌──────────┐  current   ┌─────────┐  appeared / disappeared  ┌──────────┐
//! │ Fetching │──────────▶│ Diffing │────────────────────────▶│ Applying │──▶ Done
//! └──────────┘            └─────────┘                          └──────────┘
//!      │ provider unavailable                                       │ store unavailable
//!      └──────────────────────────▶ Aborted ◀───────────────────────┘
//! ```
//!
//! 1. Fetch the current snapshot through `MembershipSource`
//! 2. Load the previous snapshot from `RelationStore`
//! 3. `appeared = current - previous`, `disappeared = previous - current`
//! 4. Record one transition per id (change event plus edge update)
//!
//! An unchanged snapshot produces no writes at all. An aborted run leaves
//! the remaining differences for the next run to find again.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::source::MembershipSource;
use crate::traits::{Relation, RelationStore, RelationType};

/// Stage of a reconciliation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Fetching,
    Diffing,
    Applying,
    Done,
    Aborted,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Fetching => "fetching",
            CyclePhase::Diffing => "diffing",
            CyclePhase::Applying => "applying",
            CyclePhase::Done => "done",
            CyclePhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Difference between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// In current, not in previous (ascending)
    pub appeared: Vec<i64>,
    /// In previous, not in current (ascending)
    pub disappeared: Vec<i64>,
}

impl SnapshotDiff {
    /// Compute `current - previous` and `previous - current`
    ///
    /// Duplicates in `current` are ignored.
    pub fn between(previous: &HashSet<i64>, current: &[i64]) -> Self {
        let current: HashSet<i64> = current.iter().copied().collect();

        let mut appeared: Vec<i64> = current.difference(previous).copied().collect();
        let mut disappeared: Vec<i64> = previous.difference(&current).copied().collect();
        appeared.sort_unstable();
        disappeared.sort_unstable();

        Self {
            appeared,
            disappeared,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.disappeared.is_empty()
    }
}

/// Outcome of one reconciliation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The diff was applied in full (possibly an empty diff)
    Completed {
        owner_id: i64,
        relation_type: RelationType,
        diff: SnapshotDiff,
    },

    /// The run stopped early
    Aborted {
        owner_id: i64,
        relation_type: RelationType,
        /// Phase in which the run stopped
        phase: CyclePhase,
        reason: String,
    },
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed { .. })
    }

    /// The final phase: `Done` or `Aborted`
    pub fn phase(&self) -> CyclePhase {
        match self {
            CycleOutcome::Completed { .. } => CyclePhase::Done,
            CycleOutcome::Aborted { .. } => CyclePhase::Aborted,
        }
    }
}

/// Fetch-diff-apply for one owner and relation type at a time
///
/// The engine holds no per-owner state; one instance serves every watch
/// loop concurrently.
pub struct ReconciliationEngine {
    source: Arc<MembershipSource>,
    store: Arc<dyn RelationStore>,
}

impl ReconciliationEngine {
    /// Create a new engine
    pub fn new(source: Arc<MembershipSource>, store: Arc<dyn RelationStore>) -> Self {
        Self { source, store }
    }

    /// Run one reconciliation cycle
    ///
    /// Never fails: failures end the run as [`CycleOutcome::Aborted`] and
    /// are logged. Provider failures are warnings (the next tick retries),
    /// store failures are errors.
    pub async fn run(&self, owner_id: i64, relation_type: RelationType) -> CycleOutcome {
        let mut phase = CyclePhase::Fetching;
        match self.try_run(owner_id, relation_type, &mut phase).await {
            Ok(diff) => CycleOutcome::Completed {
                owner_id,
                relation_type,
                diff,
            },
            Err(e) => {
                if e.is_transient() {
                    warn!(
                        "Cycle for {} of {} aborted while {}: {}",
                        relation_type, owner_id, phase, e
                    );
                } else {
                    error!(
                        "Cycle for {} of {} aborted while {}: {}",
                        relation_type, owner_id, phase, e
                    );
                }
                CycleOutcome::Aborted {
                    owner_id,
                    relation_type,
                    phase,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_run(
        &self,
        owner_id: i64,
        relation_type: RelationType,
        phase: &mut CyclePhase,
    ) -> Result<SnapshotDiff> {
        let current = self
            .source
            .get_connected_ids(owner_id, relation_type)
            .await?;

        *phase = CyclePhase::Diffing;
        let previous = self
            .store
            .find_targets(owner_id, relation_type)
            .await
            .map_err(Self::store_error)?;
        let diff = SnapshotDiff::between(&previous, &current);

        if diff.is_empty() {
            debug!(
                "No {} changes for {} ({} live)",
                relation_type,
                owner_id,
                previous.len()
            );
            *phase = CyclePhase::Done;
            return Ok(diff);
        }

        *phase = CyclePhase::Applying;
        let now = Utc::now();

        for target_id in &diff.appeared {
            let relation = Relation::new(owner_id, *target_id, relation_type);
            self.store
                .record_transition(&relation, true, now)
                .await
                .map_err(Self::store_error)?;
            info!("New relation appeared: {}", relation);
        }

        for target_id in &diff.disappeared {
            let relation = Relation::new(owner_id, *target_id, relation_type);
            self.store
                .record_transition(&relation, false, now)
                .await
                .map_err(Self::store_error)?;
            info!("Relation disappeared: {}", relation);
        }

        *phase = CyclePhase::Done;
        Ok(diff)
    }

    /// Any store failure stops the run; report it as such
    fn store_error(e: Error) -> Error {
        match e {
            Error::StoreUnavailable(_) => e,
            other => Error::store_unavailable(other.to_string()),
        }
    }
}
