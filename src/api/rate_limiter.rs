//! Client-side rate limiter for backend requests
//!
//! GCRA via the governor crate. Signal bundles fan out several requests at
//! once; the limiter keeps a burst of consumers from hammering the backend.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Maximum time a request waits for a permit
const QUEUE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum RateLimiterError {
    #[error("Rate limit queue timeout after {0}s")]
    QueueTimeout(u64),
}

/// Per-process limiter shared by every request of an `ApiClient`
pub struct RateLimiter {
    limiter: GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    queue_timeout: Duration,
}

impl RateLimiter {
    /// `requests_per_minute` of zero is treated as one
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::with_quota(requests_per_minute, QUEUE_TIMEOUT_SECS)
    }

    pub fn with_quota(requests_per_minute: u32, queue_timeout_secs: u64) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));

        Self {
            limiter: GovernorRateLimiter::direct(quota),
            queue_timeout: Duration::from_secs(queue_timeout_secs),
        }
    }

    /// Waits for a permit, giving up after the queue timeout
    pub async fn wait(&self) -> Result<(), RateLimiterError> {
        match timeout(self.queue_timeout, self.limiter.until_ready()).await {
            Ok(()) => {
                debug!("Rate limit permission granted");
                Ok(())
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.queue_timeout.as_secs(),
                    "Rate limit queue timeout exceeded"
                );
                Err(RateLimiterError::QueueTimeout(self.queue_timeout.as_secs()))
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("queue_timeout", &self.queue_timeout)
            .finish()
    }
}
