//! Per-owner watch loops
//!
//! The [`WatchScheduler`] owns one cancellable background task per watched
//! owner. Each tick of a task runs one reconciliation cycle per relation
//! type configured for that owner.
//!
//! ## Lifecycle
//!
//! ```text
//! schedule(x) ──▶ running ──unschedule(x)──▶ draining ──task exits──▶ (gone)
//!      ▲                                        │
//!      └──── schedule(x) again: new loop waits ─┘
//!            for the draining one to exit
//! ```
//!
//! - `is_running` follows the most recent `schedule`/`unschedule` call
//! - `schedule` on a running owner is a no-op
//! - `unschedule` cancels the task and returns once the task has exited
//! - a loop started while an older one for the same owner is draining
//!   runs its first cycle only after the older one has exited, so two
//!   loops never run cycles for the same owner at once
//! - a cycle in flight at cancellation is abandoned at its next await
//!   point; each transition is atomic in the store, so at worst the
//!   remaining differences are picked up by the next cycle
//!
//! Loops for different owners run concurrently, but every provider call
//! goes through the one shared gateway, so the global call rate stays
//! bounded however many owners are watched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WatchConfig;
use crate::engine::{CycleOutcome, CyclePhase, ReconciliationEngine};
use crate::error::{Error, Result};
use crate::traits::RelationType;

/// Events emitted by the WatchScheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A watch loop was started
    Scheduled { owner_id: i64 },

    /// A watch loop has exited after cancellation
    Unscheduled { owner_id: i64 },

    /// A cycle applied its diff
    CycleCompleted {
        owner_id: i64,
        relation_type: RelationType,
        appeared: Vec<i64>,
        disappeared: Vec<i64>,
    },

    /// A cycle stopped early; the next tick retries
    CycleAborted {
        owner_id: i64,
        relation_type: RelationType,
        phase: CyclePhase,
        reason: String,
    },
}

impl From<CycleOutcome> for WatchEvent {
    fn from(outcome: CycleOutcome) -> Self {
        match outcome {
            CycleOutcome::Completed {
                owner_id,
                relation_type,
                diff,
            } => WatchEvent::CycleCompleted {
                owner_id,
                relation_type,
                appeared: diff.appeared,
                disappeared: diff.disappeared,
            },
            CycleOutcome::Aborted {
                owner_id,
                relation_type,
                phase,
                reason,
            } => WatchEvent::CycleAborted {
                owner_id,
                relation_type,
                phase,
                reason,
            },
        }
    }
}

/// Bookkeeping for one watch loop
struct WatchHandle {
    /// Distinguishes this loop from a later one for the same owner
    generation: u64,
    /// Cancelled to ask the loop to stop
    cancel: CancellationToken,
    /// Cancelled by the loop itself on exit (including panics)
    stopped: CancellationToken,
}

/// Loops by owner
#[derive(Default)]
struct Watches {
    /// Loops that have not been asked to stop
    running: HashMap<i64, WatchHandle>,
    /// Latest cancelled loop per owner that may still be exiting
    draining: HashMap<i64, WatchHandle>,
}

/// Starts, stops and tracks per-owner watch loops
pub struct WatchScheduler {
    engine: Arc<ReconciliationEngine>,
    config: WatchConfig,
    watches: Mutex<Watches>,
    next_generation: AtomicU64,
    event_tx: mpsc::Sender<WatchEvent>,
}

impl WatchScheduler {
    /// Create a new scheduler
    ///
    /// # Parameters
    ///
    /// - `engine`: Engine shared by every watch loop
    /// - `config`: Poll interval, relation types and event channel capacity
    ///
    /// # Returns
    ///
    /// A tuple of (scheduler, event_receiver) where event_receiver yields
    /// watch events
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        config: &WatchConfig,
    ) -> Result<(Self, mpsc::Receiver<WatchEvent>)> {
        config.scheduler.validate()?;
        if config.relation_types.is_empty() {
            return Err(Error::config("At least one relation type must be watched"));
        }

        let (tx, rx) = mpsc::channel(config.scheduler.event_channel_capacity);

        let scheduler = Self {
            engine,
            config: config.clone(),
            watches: Mutex::new(Watches::default()),
            next_generation: AtomicU64::new(0),
            event_tx: tx,
        };

        Ok((scheduler, rx))
    }

    /// Start watching `owner_id`
    ///
    /// The first cycle runs immediately, then one per poll interval. If a
    /// previous loop for the owner is still exiting, the first cycle waits
    /// for it.
    ///
    /// # Returns
    ///
    /// `true` if a loop was started, `false` if one was already running
    pub fn schedule(&self, owner_id: i64) -> bool {
        let mut watches = self.lock_watches();
        if watches.running.contains_key(&owner_id) {
            debug!("Watch for {} already running", owner_id);
            return false;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let stopped = CancellationToken::new();
        let predecessor = watches
            .draining
            .get(&owner_id)
            .map(|handle| handle.stopped.clone());
        let relation_types = self.config.relation_types_for(owner_id).to_vec();
        let poll_interval = self.config.scheduler.poll_interval();

        tokio::spawn(watch_loop(WatchLoop {
            engine: Arc::clone(&self.engine),
            owner_id,
            relation_types: relation_types.clone(),
            poll_interval,
            predecessor,
            cancel: cancel.clone(),
            stopped: stopped.clone(),
            event_tx: self.event_tx.clone(),
        }));

        watches.running.insert(
            owner_id,
            WatchHandle {
                generation,
                cancel,
                stopped,
            },
        );
        drop(watches);

        info!(
            "Watching {} (relation types: {:?}, interval: {:?})",
            owner_id, relation_types, poll_interval
        );
        emit(&self.event_tx, WatchEvent::Scheduled { owner_id });
        true
    }

    /// Stop watching `owner_id`
    ///
    /// The owner stops counting as running at once; the call returns once
    /// the loop has exited. A concurrent call for an owner that is already
    /// draining waits for the same exit.
    ///
    /// # Returns
    ///
    /// `true` if this call stopped a running loop, `false` otherwise
    pub async fn unschedule(&self, owner_id: i64) -> bool {
        let (stopping, draining) = {
            let mut watches = self.lock_watches();
            match watches.running.remove(&owner_id) {
                Some(handle) => {
                    handle.cancel.cancel();
                    let stopping = (handle.generation, handle.stopped.clone());
                    watches.draining.insert(owner_id, handle);
                    (Some(stopping), None)
                }
                None => (
                    None,
                    watches
                        .draining
                        .get(&owner_id)
                        .map(|handle| handle.stopped.clone()),
                ),
            }
        };

        if let Some((generation, stopped)) = stopping {
            self.finish_stop(owner_id, generation, stopped).await;
            return true;
        }
        if let Some(stopped) = draining {
            stopped.cancelled().await;
        }
        false
    }

    /// Whether a watch loop is scheduled for `owner_id`
    pub fn is_running(&self, owner_id: i64) -> bool {
        self.lock_watches().running.contains_key(&owner_id)
    }

    /// Owners with a watch loop, ascending
    pub fn running_owners(&self) -> Vec<i64> {
        let mut owners: Vec<i64> = self.lock_watches().running.keys().copied().collect();
        owners.sort_unstable();
        owners
    }

    /// Stop every watch loop and wait for all of them to exit
    pub async fn shutdown(&self) {
        let (stopping, draining) = {
            let mut watches = self.lock_watches();
            let mut stopping: Vec<(i64, u64, CancellationToken)> = Vec::new();
            for (owner_id, handle) in std::mem::take(&mut watches.running) {
                handle.cancel.cancel();
                stopping.push((owner_id, handle.generation, handle.stopped.clone()));
                watches.draining.insert(owner_id, handle);
            }
            stopping.sort_unstable_by_key(|(owner_id, _, _)| *owner_id);
            let draining: Vec<CancellationToken> = watches
                .draining
                .values()
                .map(|handle| handle.stopped.clone())
                .collect();
            (stopping, draining)
        };

        for (owner_id, generation, stopped) in stopping {
            self.finish_stop(owner_id, generation, stopped).await;
        }
        // Loops stopped by concurrent unschedule calls
        for stopped in draining {
            stopped.cancelled().await;
        }
    }

    /// Wait for a cancelled loop to exit, then forget it
    async fn finish_stop(&self, owner_id: i64, generation: u64, stopped: CancellationToken) {
        stopped.cancelled().await;

        {
            let mut watches = self.lock_watches();
            if watches
                .draining
                .get(&owner_id)
                .is_some_and(|handle| handle.generation == generation)
            {
                watches.draining.remove(&owner_id);
            }
        }

        info!("Stopped watching {}", owner_id);
        emit(&self.event_tx, WatchEvent::Unscheduled { owner_id });
    }

    fn lock_watches(&self) -> MutexGuard<'_, Watches> {
        // Critical sections never panic; recover the map if one ever did
        self.watches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything a watch loop owns
struct WatchLoop {
    engine: Arc<ReconciliationEngine>,
    owner_id: i64,
    relation_types: Vec<RelationType>,
    poll_interval: Duration,
    /// Exit signal of the previous loop for the owner, if it was draining
    predecessor: Option<CancellationToken>,
    cancel: CancellationToken,
    stopped: CancellationToken,
    event_tx: mpsc::Sender<WatchEvent>,
}

async fn watch_loop(watch: WatchLoop) {
    let WatchLoop {
        engine,
        owner_id,
        relation_types,
        poll_interval,
        predecessor,
        cancel,
        stopped,
        event_tx,
    } = watch;
    let _stopped = stopped.drop_guard();

    // Not cancellable: our own exit must imply the previous loop's exit
    if let Some(previous) = predecessor {
        previous.cancelled().await;
    }

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'watch: loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break 'watch,
            _ = ticker.tick() => {}
        }

        debug!("Tick for {}", owner_id);
        for relation_type in &relation_types {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Abandoning in-flight {} cycle for {}", relation_type, owner_id);
                    break 'watch;
                }
                outcome = engine.run(owner_id, *relation_type) => outcome,
            };
            emit(&event_tx, outcome.into());
        }
    }

    debug!("Watch loop for {} exited", owner_id);
}

/// Emit a watch event
///
/// A full channel means monitoring is slower than event generation; the
/// event is dropped rather than blocking the watch loop.
fn emit(event_tx: &mpsc::Sender<WatchEvent>, event: WatchEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
        Err(TrySendError::Closed(_)) => {
            // Nobody is listening
        }
    }
}
