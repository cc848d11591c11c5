// # relwatch-core
//
// Core library for the relation watcher.
//
// ## Architecture Overview
//
// The library polls a social-graph provider for the relations of registered
// owner accounts and records every appearance and disappearance:
// - **ProviderClient**: Trait for fetching connection listings and profiles
// - **RateLimitedGateway**: Single throttled entry point for all provider calls
// - **MembershipSource**: Paged listings plus profile caching, through the gateway
// - **ReconciliationEngine**: Fetch → diff → apply for one owner and relation type
// - **WatchScheduler**: One cancellable periodic task per watched owner
// - **RelationStore / RegistrationStore / ProfileStore**: Persistence traits
// - **WatchService**: Register/start/stop/history operations for front ends
//
// ## Design Principles
//
// 1. **One gateway**: Every provider call is serialized and spaced, however
//    many owners are watched
// 2. **Fail closed**: A failed fetch aborts the cycle; it is never read as
//    an empty relation
// 3. **Idempotency**: An unchanged snapshot produces no writes
// 4. **Library-First**: The daemon is a thin wiring layer over this crate

pub mod traits;
pub mod gateway;
pub mod source;
pub mod engine;
pub mod scheduler;
pub mod service;
pub mod config;
pub mod error;
pub mod state;

// Re-export core types for convenience
pub use traits::{
    ConnectionPage, ProfileStore, ProviderClient, RegistrationStore, Relation, RelationChange,
    RelationStore, RelationType, UserProfile,
};
pub use gateway::RateLimitedGateway;
pub use source::MembershipSource;
pub use engine::{CycleOutcome, CyclePhase, ReconciliationEngine, SnapshotDiff};
pub use scheduler::{WatchEvent, WatchScheduler};
pub use service::{WatchService, WatchStatus};
pub use config::{GatewayConfig, ProviderConfig, SchedulerConfig, StoreConfig, WatchConfig};
pub use error::{Error, Result};
pub use state::{FileStore, MemoryStore};
