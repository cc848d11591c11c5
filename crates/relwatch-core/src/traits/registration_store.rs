// # Registration Store Trait
//
// The set of owner accounts the system is asked to watch.

use async_trait::async_trait;

/// Trait for registration store implementations
///
/// Registration only records intent. Whether a watch is actually running is
/// owned by `WatchScheduler`; `WatchService` keeps the two in step.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Register an owner. Registering twice is a no-op.
    async fn add(&self, owner_id: i64) -> Result<(), crate::Error>;

    /// Unregister an owner. Unknown owners are ignored.
    async fn remove(&self, owner_id: i64) -> Result<(), crate::Error>;

    /// Every registered owner, ascending
    async fn list_all(&self) -> Result<Vec<i64>, crate::Error>;

    /// Whether `owner_id` is registered
    async fn contains(&self, owner_id: i64) -> Result<bool, crate::Error> {
        Ok(self.list_all().await?.contains(&owner_id))
    }
}
