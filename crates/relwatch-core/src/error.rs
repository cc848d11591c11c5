//! Error types for the relation watcher
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for relation watcher operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the relation watcher
#[derive(Error, Debug)]
pub enum Error {
    /// The social-graph provider failed or rejected a call.
    ///
    /// Transient: the cycle that hit it is abandoned and the next
    /// scheduled tick retries.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A persistence operation failed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation on an owner that was never registered
    #[error("Owner {0} is not registered")]
    NotRegistered(i64),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a provider-unavailable error
    pub fn provider_unavailable(msg: impl Into<String>) -> Self {
        Self::ProviderUnavailable(msg.into())
    }

    /// Create a store-unavailable error
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the failure is expected to clear up on its own by the next tick
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
