//! Configuration types for the relation watcher
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::traits::RelationType;

/// Main watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Provider call throttling
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Watch loop settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Relation types watched for owners without an override
    #[serde(default = "default_relation_types")]
    pub relation_types: Vec<RelationType>,

    /// Per-owner relation types, overriding `relation_types`
    #[serde(default)]
    pub owner_relation_types: HashMap<i64, Vec<RelationType>>,

    /// Social-graph provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

impl WatchConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            scheduler: SchedulerConfig::default(),
            relation_types: default_relation_types(),
            owner_relation_types: HashMap::new(),
            provider: ProviderConfig::default(),
            store: StoreConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.scheduler.validate()?;

        if self.relation_types.is_empty() {
            return Err(crate::Error::config(
                "At least one relation type must be watched",
            ));
        }

        for (owner_id, types) in &self.owner_relation_types {
            if types.is_empty() {
                return Err(crate::Error::config(format!(
                    "Relation type override for owner {} is empty",
                    owner_id
                )));
            }
        }

        self.provider.validate()?;
        self.store.validate()?;

        Ok(())
    }

    /// Relation types to watch for `owner_id`
    pub fn relation_types_for(&self, owner_id: i64) -> &[RelationType] {
        self.owner_relation_types
            .get(&owner_id)
            .map(Vec::as_slice)
            .unwrap_or(&self.relation_types)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Minimum time between two provider calls, across all watches (in milliseconds)
    ///
    /// The provider's rate limit is global, not per owner.
    #[serde(default = "default_min_call_delay_ms")]
    pub min_call_delay_ms: u64,
}

impl GatewayConfig {
    pub fn min_call_delay(&self) -> Duration {
        Duration::from_millis(self.min_call_delay_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            min_call_delay_ms: default_min_call_delay_ms(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Time between two reconciliation cycles of the same owner (in seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Capacity of the monitoring event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::config("Poll interval must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Provider configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// VK social-graph API
    Vk {
        /// User access token obtained out of band
        access_token: String,
        /// API version sent with each request
        #[serde(default = "default_vk_api_version")]
        api_version: String,
        /// API base URL
        #[serde(default = "default_vk_base_url")]
        base_url: String,
    },
}

impl ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProviderConfig::Vk {
                access_token,
                api_version,
                base_url,
            } => {
                if access_token.is_empty() {
                    return Err(crate::Error::config("VK access token cannot be empty"));
                }
                if api_version.is_empty() {
                    return Err(crate::Error::config("VK API version cannot be empty"));
                }
                if !base_url.starts_with("https://") && !base_url.starts_with("http://") {
                    return Err(crate::Error::config(format!(
                        "VK base URL must use HTTP or HTTPS scheme. Got: {}",
                        base_url
                    )));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Vk { .. } => "vk",
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Vk {
            access_token: String::new(),
            api_version: default_vk_api_version(),
            base_url: default_vk_base_url(),
        }
    }
}

// Custom Debug implementation that hides the access token
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderConfig::Vk {
                api_version,
                base_url,
                ..
            } => f
                .debug_struct("Vk")
                .field("access_token", &"<REDACTED>")
                .field("api_version", api_version)
                .field("base_url", base_url)
                .finish(),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// File-backed store
    File {
        /// Path to the store file
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("Store file path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

fn default_relation_types() -> Vec<RelationType> {
    RelationType::ALL.to_vec()
}

fn default_min_call_delay_ms() -> u64 {
    350
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_vk_api_version() -> String {
    "5.131".to_string()
}

fn default_vk_base_url() -> String {
    "https://api.vk.com/method".to_string()
}
