// # Profile Store Trait
//
// Local cache of provider user records, populated lazily the first time an
// id is observed in a snapshot.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Cached provider user record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

impl UserProfile {
    pub fn new(id: i64, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id,
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    /// "First Last"
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Trait for profile cache implementations
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// The subset of `ids` with no cached profile, in input order, deduplicated
    async fn missing(&self, ids: &[i64]) -> Result<Vec<i64>, crate::Error>;

    /// Store a batch of profiles. Either every profile is stored or none is.
    async fn save_all(&self, profiles: &[UserProfile]) -> Result<(), crate::Error>;

    /// Cached profile for `id`, if any
    async fn find(&self, id: i64) -> Result<Option<UserProfile>, crate::Error>;
}
