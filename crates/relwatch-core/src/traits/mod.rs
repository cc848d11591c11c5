//! Core traits for the relation watcher
//!
//! This module defines the abstract interfaces the reconciliation core
//! depends on.
//!
//! - [`ProviderClient`]: Query the external social-graph API
//! - [`RelationStore`]: Live relation edges and the change log
//! - [`RegistrationStore`]: Owners registered for watching
//! - [`ProfileStore`]: Local cache of provider user records

pub mod profile_store;
pub mod provider_client;
pub mod registration_store;
pub mod relation_store;

pub use profile_store::{ProfileStore, UserProfile};
pub use provider_client::{ConnectionPage, ProviderClient};
pub use registration_store::RegistrationStore;
pub use relation_store::{Relation, RelationChange, RelationStore, RelationType};
