//! Watch service
//!
//! The operations a front end needs, on top of the scheduler and the
//! stores: register and unregister owners, start and stop their watches,
//! and read back the recorded history.
//!
//! Registration and running state are kept in step here:
//!
//! - only registered owners can be started
//! - unregistering stops the watch before removing the registration
//!
//! Register, unregister, start and start-all run one at a time, so a start
//! that raced an unregister can never leave a watch behind for an owner
//! that is no longer registered.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::scheduler::WatchScheduler;
use crate::source::MembershipSource;
use crate::traits::{RegistrationStore, RelationChange, RelationStore, UserProfile};

/// Registration and running state of one owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchStatus {
    pub owner_id: i64,
    pub running: bool,
}

/// Facade over scheduler, registrations, history and profiles
pub struct WatchService {
    scheduler: Arc<WatchScheduler>,
    registrations: Arc<dyn RegistrationStore>,
    relations: Arc<dyn RelationStore>,
    source: Arc<MembershipSource>,
    /// Held across every operation that changes registration or running state
    lifecycle: Mutex<()>,
}

impl WatchService {
    pub fn new(
        scheduler: Arc<WatchScheduler>,
        registrations: Arc<dyn RegistrationStore>,
        relations: Arc<dyn RelationStore>,
        source: Arc<MembershipSource>,
    ) -> Self {
        Self {
            scheduler,
            registrations,
            relations,
            source,
            lifecycle: Mutex::new(()),
        }
    }

    pub fn scheduler(&self) -> &Arc<WatchScheduler> {
        &self.scheduler
    }

    /// Register `owner_id` without starting it
    pub async fn register(&self, owner_id: i64) -> Result<()> {
        validate_owner(owner_id)?;
        let _lifecycle = self.lifecycle.lock().await;
        self.registrations.add(owner_id).await?;
        info!("Registered owner {}", owner_id);
        Ok(())
    }

    /// Stop the watch for `owner_id` (if any), then drop its registration
    ///
    /// Recorded history is kept.
    pub async fn unregister(&self, owner_id: i64) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.scheduler.unschedule(owner_id).await;
        self.registrations.remove(owner_id).await?;
        info!("Unregistered owner {}", owner_id);
        Ok(())
    }

    /// Start watching a registered owner
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: A watch was started
    /// - `Ok(false)`: The owner was already being watched
    /// - `Err(Error::NotRegistered)`: The owner is not registered
    pub async fn start(&self, owner_id: i64) -> Result<bool> {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.registrations.contains(owner_id).await? {
            return Err(Error::NotRegistered(owner_id));
        }
        Ok(self.scheduler.schedule(owner_id))
    }

    /// Stop watching `owner_id`; returns whether a watch was running
    pub async fn stop(&self, owner_id: i64) -> bool {
        self.scheduler.unschedule(owner_id).await
    }

    /// Start every registered owner that is not running yet
    ///
    /// # Returns
    ///
    /// Number of watches started
    pub async fn start_all(&self) -> Result<usize> {
        let _lifecycle = self.lifecycle.lock().await;
        let owners = self.registrations.list_all().await?;
        let started = owners
            .into_iter()
            .filter(|owner_id| self.scheduler.schedule(*owner_id))
            .count();
        info!("Started {} watches", started);
        Ok(started)
    }

    /// Every registered owner with its running state, ascending by owner
    pub async fn statuses(&self) -> Result<Vec<WatchStatus>> {
        let owners = self.registrations.list_all().await?;
        Ok(owners
            .into_iter()
            .map(|owner_id| WatchStatus {
                owner_id,
                running: self.scheduler.is_running(owner_id),
            })
            .collect())
    }

    /// History of one owner, newest first
    pub async fn changes(&self, owner_id: i64) -> Result<Vec<RelationChange>> {
        self.relations.list_changes_by_owner(owner_id).await
    }

    /// History of every owner, newest first
    pub async fn all_changes(&self) -> Result<Vec<RelationChange>> {
        self.relations.list_all_changes().await
    }

    /// Profile of `id`, fetched through the gateway on a cache miss
    pub async fn profile(&self, id: i64) -> Result<Option<UserProfile>> {
        self.source.get_profile(id).await
    }

    /// Stop every watch and flush the store
    pub async fn shutdown(&self) -> Result<()> {
        {
            let _lifecycle = self.lifecycle.lock().await;
            self.scheduler.shutdown().await;
        }
        if let Err(e) = self.relations.flush().await {
            warn!("Failed to flush store on shutdown: {}", e);
            return Err(e);
        }
        info!("Watch service stopped");
        Ok(())
    }
}

fn validate_owner(owner_id: i64) -> Result<()> {
    if owner_id <= 0 {
        return Err(Error::invalid_input(format!(
            "Owner id must be positive, got {}",
            owner_id
        )));
    }
    Ok(())
}
