// # Provider Client Trait
//
// Defines the interface to the external social-graph API.
//
// ## Implementations
//
// - VK: `relwatch-provider-vk` crate
//
// ## Usage
//
// ```rust,ignore
// use relwatch_core::{ProviderClient, RelationType};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let client = /* ProviderClient implementation */;
//
//     let page = client.list_connections(1, RelationType::Friend, 0).await?;
//     println!("{} of {} friends", page.ids.len(), page.total);
//
//     Ok(())
// }
// ```

use async_trait::async_trait;

use crate::traits::profile_store::UserProfile;
use crate::traits::relation_store::RelationType;

/// One page of a connection listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPage {
    /// Total number of connections the provider reports for the relation
    pub total: usize,
    /// Target ids in this page
    pub ids: Vec<i64>,
}

impl ConnectionPage {
    /// A page that holds the complete listing
    pub fn complete(ids: Vec<i64>) -> Self {
        Self {
            total: ids.len(),
            ids,
        }
    }
}

/// Trait for social-graph provider implementations
///
/// # Trust Level: Untrusted
///
/// Clients execute exactly one provider request per invocation and report
/// the outcome. They never throttle, retry or cache: throttling belongs to
/// `RateLimitedGateway`, retry to the next scheduler tick and caching to
/// `ProfileStore`. Every call is made through the gateway by
/// `MembershipSource`, never directly.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// List connections of `owner_id` for `relation_type`, starting at `offset`
    ///
    /// # Returns
    ///
    /// - `Ok(ConnectionPage)`: A page of target ids plus the reported total
    /// - `Err(Error)`: The request failed or was rejected
    async fn list_connections(
        &self,
        owner_id: i64,
        relation_type: RelationType,
        offset: usize,
    ) -> Result<ConnectionPage, crate::Error>;

    /// Fetch profiles for a batch of ids
    ///
    /// Ids the provider does not know are simply absent from the result.
    async fn fetch_profiles(&self, ids: &[i64]) -> Result<Vec<UserProfile>, crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}
