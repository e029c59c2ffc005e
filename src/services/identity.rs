use std::net::SocketAddr;

use hyper::header::AUTHORIZATION;
use hyper::HeaderMap;

use crate::models::{ClientKey, CookieJar, IdentityHint, RequestContext};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN_CLIENT: &str = "unknown";

/// Derives the client key and identity hint for a request. Nothing here
/// verifies credentials: a session marker only has to be present.
#[derive(Debug, Clone)]
pub struct IdentityExtractor {
    session_cookies: Vec<String>,
    trusted_proxy_hops: usize,
}

impl IdentityExtractor {
    pub fn new(session_cookies: Vec<String>, trusted_proxy_hops: usize) -> Self {
        Self {
            session_cookies,
            trusted_proxy_hops,
        }
    }

    pub fn context(
        &self,
        remote: Option<SocketAddr>,
        headers: &HeaderMap,
        cookies: CookieJar,
    ) -> RequestContext {
        RequestContext {
            client_key: client_key(remote, headers, self.trusted_proxy_hops),
            identity: self.identity_hint(headers, &cookies),
            cookies,
        }
    }

    pub fn identity_hint(&self, headers: &HeaderMap, cookies: &CookieJar) -> IdentityHint {
        let has_session_cookie = self
            .session_cookies
            .iter()
            .any(|name| cookies.get(name).map_or(false, |value| !value.trim().is_empty()));

        IdentityHint {
            authenticated: has_session_cookie || has_bearer_token(headers),
        }
    }
}

fn has_bearer_token(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map_or(false, |token| !token.trim().is_empty())
}

/// Resolves the caller address with `trusted_hops` reverse proxies in front
/// of the gateway. The candidate chain is the socket peer followed by the
/// `X-Forwarded-For` entries from right to left; the key is the entry
/// `trusted_hops` steps into that chain, or the furthest one available.
pub fn client_key(remote: Option<SocketAddr>, headers: &HeaderMap, trusted_hops: usize) -> ClientKey {
    let mut chain: Vec<String> = remote.map(|addr| addr.ip().to_string()).into_iter().collect();

    let forwarded: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .collect();
    chain.extend(forwarded.into_iter().rev().map(str::to_string));

    chain
        .get(trusted_hops)
        .or_else(|| chain.last())
        .map(|addr| ClientKey::new(addr.as_str()))
        .unwrap_or_else(|| ClientKey::new(UNKNOWN_CLIENT))
}
