//! Membership source
//!
//! Wraps a [`ProviderClient`] with the gateway and the profile cache:
//!
//! - connection listings are fetched page by page until the provider's
//!   reported total is reached, each page through the gateway
//! - every id in a fresh listing gets a cached profile before the listing
//!   is handed to the reconciliation engine
//!
//! Provider failures surface as `Error::ProviderUnavailable`, never as a
//! shorter list, so callers cannot mistake a failed call for an empty
//! relation.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::gateway::RateLimitedGateway;
use crate::traits::{ProfileStore, ProviderClient, RelationType, UserProfile};

/// Maximum number of ids per profile request
pub const PROFILE_BATCH_SIZE: usize = 1000;

/// Provider access for the reconciliation engine
pub struct MembershipSource {
    client: Arc<dyn ProviderClient>,
    gateway: Arc<RateLimitedGateway>,
    profiles: Arc<dyn ProfileStore>,
}

impl MembershipSource {
    /// Create a new membership source
    ///
    /// # Parameters
    ///
    /// - `client`: Provider client implementation
    /// - `gateway`: Gateway shared by every caller of this provider
    /// - `profiles`: Profile cache
    pub fn new(
        client: Arc<dyn ProviderClient>,
        gateway: Arc<RateLimitedGateway>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            client,
            gateway,
            profiles,
        }
    }

    /// Current target ids of `owner_id` for `relation_type`
    ///
    /// Profiles of previously unseen ids are cached before returning. A
    /// failed profile fetch fails the whole call, so the engine never diffs
    /// against a listing whose targets could not be resolved.
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<i64>)`: The complete listing (possibly empty)
    /// - `Err(Error::ProviderUnavailable)`: Listing or profile fetch failed
    /// - `Err(Error::StoreUnavailable)`: The profile cache could not be written
    pub async fn get_connected_ids(
        &self,
        owner_id: i64,
        relation_type: RelationType,
    ) -> Result<Vec<i64>> {
        let ids = self.fetch_all_connections(owner_id, relation_type).await?;
        self.ensure_profiles_cached(&ids).await?;
        Ok(ids)
    }

    async fn fetch_all_connections(
        &self,
        owner_id: i64,
        relation_type: RelationType,
    ) -> Result<Vec<i64>> {
        let operation = format!("list {}s of {}", relation_type, owner_id);
        let mut ids = Vec::new();

        loop {
            let offset = ids.len();
            let page = self
                .gateway
                .call(&operation, || {
                    self.client.list_connections(owner_id, relation_type, offset)
                })
                .await?;

            let fetched = page.ids.len();
            ids.extend(page.ids);

            if ids.len() >= page.total {
                break;
            }
            if fetched == 0 {
                warn!(
                    "{}: provider stopped at {} of {} ids",
                    operation,
                    ids.len(),
                    page.total
                );
                return Err(Error::provider_unavailable(format!(
                    "{}: listing truncated at {} of {} ids",
                    operation,
                    ids.len(),
                    page.total
                )));
            }
        }

        debug!("{}: {} ids", operation, ids.len());
        Ok(ids)
    }

    /// Make sure every id in `ids` has a cached profile
    ///
    /// Missing profiles are requested in batches of [`PROFILE_BATCH_SIZE`].
    /// All batches are fetched before anything is saved, so a failing batch
    /// leaves the cache untouched.
    pub async fn ensure_profiles_cached(&self, ids: &[i64]) -> Result<()> {
        let missing = self.profiles.missing(ids).await?;
        if missing.is_empty() {
            return Ok(());
        }

        let mut fetched = Vec::with_capacity(missing.len());
        for batch in missing.chunks(PROFILE_BATCH_SIZE) {
            let profiles = self
                .gateway
                .call("fetch profiles", || self.client.fetch_profiles(batch))
                .await?;
            fetched.extend(profiles);
        }

        self.profiles.save_all(&fetched).await?;
        debug!(
            "Cached {} new profiles ({} requested)",
            fetched.len(),
            missing.len()
        );
        Ok(())
    }

    /// Cached profile for `id`, fetching it on a cache miss
    ///
    /// Returns `Ok(None)` when the provider does not know the id.
    pub async fn get_profile(&self, id: i64) -> Result<Option<UserProfile>> {
        if let Some(profile) = self.profiles.find(id).await? {
            return Ok(Some(profile));
        }
        self.ensure_profiles_cached(&[id]).await?;
        self.profiles.find(id).await
    }
}
