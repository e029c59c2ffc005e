use std::collections::HashSet;
use std::time::Duration;

use hyper::client::HttpConnector;
use hyper::header::{HeaderName, CONNECTION};
use hyper::{Body, Client, HeaderMap, Method, Request, Response, Uri};
use lazy_static::lazy_static;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::errors::GatewayError;

lazy_static! {
    /// Headers that describe a single connection and never cross the proxy.
    static ref HOP_BY_HOP: HashSet<HeaderName> = [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "proxy-connection",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
        "host",
    ]
    .into_iter()
    .map(HeaderName::from_static)
    .collect();
}

/// Forwarding router: relays admitted requests to the one upstream origin.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client<HttpConnector>,
    base_url: String,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(upstream_url: &str, request_timeout: Duration) -> Result<Self, GatewayError> {
        let base_url = upstream_url.trim_end_matches('/').to_string();
        base_url
            .parse::<Uri>()
            .map_err(|e| GatewayError::InvalidUri(e.to_string()))?;

        Ok(Self {
            client: Client::new(),
            base_url,
            timeout: request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn target_uri(&self, path_and_query: &str) -> Result<Uri, GatewayError> {
        let uri_str = format!("{}{}", self.base_url, path_and_query);
        uri_str.parse().map_err(|e: http::uri::InvalidUri| {
            error!(uri = %uri_str, error = %e, "Failed to build upstream URI");
            GatewayError::InvalidUri(e.to_string())
        })
    }

    /// Sends the request upstream and hands back the upstream response with
    /// its body still streaming. Dropping the returned future (the caller went
    /// away) drops the upstream connection with it.
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Body,
    ) -> Result<Response<Body>, GatewayError> {
        let uri = self.target_uri(path_and_query)?;

        let mut request = Request::builder()
            .method(method.clone())
            .uri(uri.clone())
            .body(body)
            .map_err(|e| GatewayError::InvalidUri(e.to_string()))?;

        let forwarded = request.headers_mut();
        for (name, value) in headers.iter() {
            forwarded.append(name.clone(), value.clone());
        }
        strip_hop_headers(forwarded);

        debug!(upstream = %uri, method = %method, "Forwarding request upstream");

        let response = match timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                if let Some(GatewayError::PayloadTooLarge { limit }) = GatewayError::find_in(&e) {
                    warn!(
                        method = %method,
                        path = %path_and_query,
                        limit,
                        "Request body exceeded its ceiling while streaming upstream"
                    );
                    return Err(GatewayError::PayloadTooLarge { limit: *limit });
                }
                error!(
                    upstream = %self.base_url,
                    method = %method,
                    path = %path_and_query,
                    error = %e,
                    "Upstream request failed"
                );
                return Err(GatewayError::Upstream(e.to_string()));
            }
            Err(_) => {
                error!(
                    upstream = %self.base_url,
                    method = %method,
                    path = %path_and_query,
                    timeout_secs = self.timeout.as_secs(),
                    "Upstream request timed out"
                );
                return Err(GatewayError::Timeout);
            }
        };

        let (mut parts, body) = response.into_parts();
        strip_hop_headers(&mut parts.headers);
        Ok(Response::from_parts(parts, body))
    }
}

/// Removes hop-by-hop headers, including any extra ones the `Connection`
/// header names.
pub fn strip_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}
