//! Rate-limited gateway to the social-graph provider
//!
//! Every provider call from every watch loop goes through one
//! [`RateLimitedGateway`]. The gateway holds a FIFO lock around the
//! timestamp of the last call, so:
//!
//! - at most one provider call is in flight at a time
//! - consecutive calls start at least `min_delay` apart, whatever the number
//!   of concurrent callers
//! - waiting callers are served in arrival order (`tokio::sync::Mutex` is fair)
//!
//! The delay applies after failures exactly as after successes, so a
//! failing provider is never hammered with back-to-back retries.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{Error, Result};

/// Serializes and throttles provider calls
///
/// The gateway is an explicit object; share it between callers with `Arc`.
#[derive(Debug)]
pub struct RateLimitedGateway {
    min_delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

/// Stamps the end of a call when dropped
///
/// Dropping happens on completion and on cancellation alike, so a call that
/// was abandoned mid-request still pushes the next call back.
struct CallSlot<'a> {
    last_call: MutexGuard<'a, Option<Instant>>,
}

impl Drop for CallSlot<'_> {
    fn drop(&mut self) {
        *self.last_call = Some(Instant::now());
    }
}

impl RateLimitedGateway {
    /// Create a gateway that spaces calls at least `min_delay` apart
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_call: Mutex::new(None),
        }
    }

    /// Create a gateway from configuration
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.min_call_delay())
    }

    /// The configured minimum delay
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Execute `call` once the throttle allows it
    ///
    /// # Parameters
    ///
    /// - `operation`: Short name used in logs and error messages
    /// - `call`: Produces the provider future; invoked only after the wait
    ///
    /// # Returns
    ///
    /// - `Ok(T)`: The call's result
    /// - `Err(Error::ProviderUnavailable)`: The call failed; any error from
    ///   `call` is reported as provider unavailability
    pub async fn call<T, F, Fut>(&self, operation: &str, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let last_call = self.last_call.lock().await;

        if let Some(previous) = *last_call {
            let ready_at = previous + self.min_delay;
            let wait = ready_at.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                debug!("{}: throttled for {:?}", operation, wait);
                tokio::time::sleep_until(ready_at).await;
            }
        }

        let slot = CallSlot { last_call };
        let result = call().await;
        drop(slot);

        result.map_err(|e| match e {
            Error::ProviderUnavailable(_) => e,
            other => {
                warn!("{} failed: {}", operation, other);
                Error::provider_unavailable(format!("{}: {}", operation, other))
            }
        })
    }
}
