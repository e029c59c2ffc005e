use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::errors::GatewayError;
use crate::models::{RateLimitStatus, RateWindow, RequestContext};
use crate::services::clock::Clock;
use crate::services::store::{MemoryStore, RateLimitStore};

/// Admission controller: fixed-window counting per client key with a quota
/// chosen from the request's identity hint.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn in_memory(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(MemoryStore::new(config.window(), clock.clone()));
        Self::new(store, clock, config)
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Charges the request to its client key and decides whether it may
    /// proceed. The counter is incremented even when the request is refused.
    pub async fn check(&self, context: &RequestContext) -> Result<RateLimitStatus, GatewayError> {
        let quota = self.config.quota_for(context.identity);
        let window = self.store.increment(&context.client_key).await;
        let status = self.status(quota, &window);

        // `count` is post-increment, so this is "pre-increment count >= quota".
        if window.count > quota {
            warn!(
                client = %context.client_key,
                authenticated = context.identity.authenticated,
                count = window.count,
                limit = quota,
                "Rate limit exceeded"
            );
            return Err(GatewayError::RateLimitExceeded(status));
        }

        debug!(
            client = %context.client_key,
            count = window.count,
            limit = quota,
            "Request admitted"
        );
        Ok(status)
    }

    fn status(&self, quota: u32, window: &RateWindow) -> RateLimitStatus {
        let window_length = self.config.window();
        // A window too long to represent as an `Instant` never closes.
        let reset = window
            .window_start
            .checked_add(window_length)
            .map_or(window_length, |end| end.saturating_duration_since(self.clock.now()));

        RateLimitStatus {
            limit: quota,
            remaining: quota.saturating_sub(window.count),
            reset,
            window: window_length,
        }
    }

    /// Periodically drops expired windows so idle clients do not pin memory.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = store.purge_expired().await;
                if removed > 0 {
                    debug!(removed, "Purged expired rate-limit windows");
                }
            }
        })
    }
}
