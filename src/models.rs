use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::Body;
use serde::Serialize;

use crate::config::GatewayConfig;
use crate::errors::GatewayError;
use crate::middleware::BodyLimits;
use crate::services::clock::{Clock, SystemClock};
use crate::services::identity::IdentityExtractor;
use crate::services::limiter::RateLimiter;
use crate::services::proxy::UpstreamClient;

/// Identifier that buckets rate-limit counters, normally the caller's IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unverified signal that the caller holds a session. Only ever used to pick
/// a throttling tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityHint {
    pub authenticated: bool,
}

impl IdentityHint {
    pub fn anonymous() -> Self {
        Self {
            authenticated: false,
        }
    }

    pub fn authenticated() -> Self {
        Self {
            authenticated: true,
        }
    }
}

/// Cookies parsed from the request headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar(HashMap<String, String>);

impl CookieJar {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    // First occurrence wins.
    pub(crate) fn insert(&mut self, name: String, value: String) {
        self.0.entry(name).or_insert(value);
    }
}

/// Immutable per-request context handed from stage to stage.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client_key: ClientKey,
    pub identity: IdentityHint,
    pub cookies: CookieJar,
}

/// Counter state of one client key inside its fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub window_start: Instant,
}

/// What the rate-limit headers report for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    /// Time left until the current window closes.
    pub reset: Duration,
    pub window: Duration,
}

/// A request that made it through edge policy and admission.
#[derive(Debug)]
pub struct Admission {
    pub context: RequestContext,
    pub status: RateLimitStatus,
    pub body: Body,
}

#[derive(Debug, Serialize)]
pub struct ErrorMessage {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct WelcomeMessage {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub identity: Arc<IdentityExtractor>,
    pub limiter: Arc<RateLimiter>,
    pub upstream: Arc<UpstreamClient>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: GatewayConfig, clock: Arc<dyn Clock>) -> Result<Self, GatewayError> {
        let upstream = UpstreamClient::new(&config.upstream_url, config.request_timeout())?;
        let limiter = RateLimiter::in_memory(config.rate_limit, clock);
        let identity = IdentityExtractor::new(
            config.session_cookies.clone(),
            config.trusted_proxy_hops,
        );

        Ok(Self {
            config: Arc::new(config),
            identity: Arc::new(identity),
            limiter: Arc::new(limiter),
            upstream: Arc::new(upstream),
        })
    }

    pub fn body_limits(&self) -> BodyLimits {
        BodyLimits {
            json: self.config.json_body_limit_bytes,
            form: self.config.form_body_limit_bytes,
            other: self.config.other_body_limit_bytes,
        }
    }
}
