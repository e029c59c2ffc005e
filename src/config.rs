use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use hyper::Uri;

use crate::models::IdentityHint;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3333;
pub const DEFAULT_UPSTREAM_URL: &str = "http://localhost:5000";
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 100 * 1024 * 1024; // 100mb
pub const RATE_LIMIT_WINDOW_SECS: u64 = 15 * 60;
pub const RATE_LIMIT_ANONYMOUS: u32 = 100; // requests per window
pub const RATE_LIMIT_AUTHENTICATED: u32 = 1000; // requests per window
pub const RATE_LIMIT_SWEEP_SECS: u64 = 60;
pub const TRUSTED_PROXY_HOPS: usize = 1;
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SESSION_COOKIES: &[&str] = &["access_token", "refresh_token"];
pub const DEFAULT_ASSET_PREFIX: &str = "assets";
pub const ALLOWED_HEADERS: [&str; 2] = ["Content-Type", "Authorization"];
pub const ALLOWED_METHODS: [&str; 6] = ["GET", "HEAD", "PUT", "PATCH", "POST", "DELETE"];

/// Fixed-window throttling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub anonymous_quota: u32,
    pub authenticated_quota: u32,
    /// How often expired windows are purged. Zero disables the sweeper.
    pub sweep_interval_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    /// Quota tier selected by the identity hint of the current request.
    pub fn quota_for(&self, hint: IdentityHint) -> u32 {
        if hint.authenticated {
            self.authenticated_quota
        } else {
            self.anonymous_quota
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: RATE_LIMIT_WINDOW_SECS,
            anonymous_quota: RATE_LIMIT_ANONYMOUS,
            authenticated_quota: RATE_LIMIT_AUTHENTICATED,
            sweep_interval_secs: RATE_LIMIT_SWEEP_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen host address
    pub host: String,

    /// Listen port
    pub port: u16,

    /// Base URL of the application service every admitted request goes to
    pub upstream_url: String,

    /// Origins allowed to make (credentialed) cross-origin requests
    pub allowed_origins: Vec<String>,

    /// Ceiling for `application/json` bodies
    pub json_body_limit_bytes: usize,

    /// Ceiling for `application/x-www-form-urlencoded` bodies
    pub form_body_limit_bytes: usize,

    /// Ceiling for every other body, enforced while it streams upstream
    pub other_body_limit_bytes: usize,

    pub rate_limit: RateLimitConfig,

    /// Number of reverse-proxy hops whose `X-Forwarded-For` entries are trusted
    pub trusted_proxy_hops: usize,

    /// Cookie names that mark a logged-in session
    pub session_cookies: Vec<String>,

    /// Upstream request timeout in seconds
    pub request_timeout_secs: u64,

    /// First path segment served from `assets_dir` instead of the upstream
    pub asset_prefix: String,

    pub assets_dir: PathBuf,

    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
            json_body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            form_body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            other_body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            rate_limit: RateLimitConfig::default(),
            trusted_proxy_hops: TRUSTED_PROXY_HOPS,
            session_cookies: DEFAULT_SESSION_COOKIES
                .iter()
                .map(|name| name.to_string())
                .collect(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            asset_prefix: DEFAULT_ASSET_PREFIX.to_string(),
            assets_dir: PathBuf::from(DEFAULT_ASSET_PREFIX),
            log_level: "info".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup; unset
    /// variables fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("GATEWAY_HOST").unwrap_or(defaults.host);
        let port = parse_var(&lookup, "PORT", defaults.port)?;
        let upstream_url = lookup("UPSTREAM_URL").unwrap_or(defaults.upstream_url);
        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .map(|raw| split_list(&raw))
            .unwrap_or(defaults.allowed_origins);

        let json_body_limit_bytes =
            parse_var(&lookup, "JSON_BODY_LIMIT_BYTES", defaults.json_body_limit_bytes)?;
        let form_body_limit_bytes =
            parse_var(&lookup, "FORM_BODY_LIMIT_BYTES", defaults.form_body_limit_bytes)?;
        let other_body_limit_bytes =
            parse_var(&lookup, "OTHER_BODY_LIMIT_BYTES", defaults.other_body_limit_bytes)?;

        let rate_limit = RateLimitConfig {
            window_secs: parse_var(
                &lookup,
                "RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit.window_secs,
            )?,
            anonymous_quota: parse_var(
                &lookup,
                "RATE_LIMIT_ANONYMOUS",
                defaults.rate_limit.anonymous_quota,
            )?,
            authenticated_quota: parse_var(
                &lookup,
                "RATE_LIMIT_AUTHENTICATED",
                defaults.rate_limit.authenticated_quota,
            )?,
            sweep_interval_secs: parse_var(
                &lookup,
                "RATE_LIMIT_SWEEP_SECS",
                defaults.rate_limit.sweep_interval_secs,
            )?,
        };

        let trusted_proxy_hops =
            parse_var(&lookup, "TRUSTED_PROXY_HOPS", defaults.trusted_proxy_hops)?;
        let session_cookies = lookup("SESSION_COOKIES")
            .map(|raw| split_list(&raw))
            .unwrap_or(defaults.session_cookies);
        let request_timeout_secs =
            parse_var(&lookup, "REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?;
        let asset_prefix = lookup("ASSET_PREFIX").unwrap_or(defaults.asset_prefix);
        let assets_dir = lookup("ASSETS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.assets_dir);
        let log_level = lookup("LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            host,
            port,
            upstream_url,
            allowed_origins,
            json_body_limit_bytes,
            form_body_limit_bytes,
            other_body_limit_bytes,
            rate_limit,
            trusted_proxy_hops,
            session_cookies,
            request_timeout_secs,
            asset_prefix,
            assets_dir,
            log_level,
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let upstream: Uri = self
            .upstream_url
            .parse()
            .with_context(|| format!("Invalid UPSTREAM_URL: {}", self.upstream_url))?;
        if upstream.scheme_str() != Some("http") || upstream.authority().is_none() {
            bail!(
                "UPSTREAM_URL must be an absolute http:// URL, got {}",
                self.upstream_url
            );
        }

        if self.allowed_origins.is_empty() {
            bail!("ALLOWED_ORIGINS must name at least one origin");
        }
        for origin in &self.allowed_origins {
            validate_origin(origin)?;
        }

        if self.json_body_limit_bytes == 0
            || self.form_body_limit_bytes == 0
            || self.other_body_limit_bytes == 0
        {
            bail!("Body size limits must be greater than zero");
        }

        let limits = &self.rate_limit;
        if limits.window_secs == 0 {
            bail!("RATE_LIMIT_WINDOW_SECS must be greater than zero");
        }
        if limits.anonymous_quota == 0 || limits.authenticated_quota == 0 {
            bail!("Rate limit quotas must be greater than zero");
        }

        if self.request_timeout_secs == 0 {
            bail!("REQUEST_TIMEOUT_SECS must be greater than zero");
        }

        if self.asset_prefix.is_empty() || self.asset_prefix.contains('/') {
            bail!(
                "ASSET_PREFIX must be a single path segment, got {:?}",
                self.asset_prefix
            );
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

// An origin is exactly `scheme://authority`, as browsers send it.
fn validate_origin(origin: &str) -> Result<()> {
    let uri: Uri = origin
        .parse()
        .with_context(|| format!("Invalid origin: {}", origin))?;
    match (uri.scheme_str(), uri.authority()) {
        (Some(scheme), Some(authority)) if origin == format!("{}://{}", scheme, authority) => {
            Ok(())
        }
        _ => bail!("Origin must look like scheme://host[:port], got {}", origin),
    }
}
