use hyper::StatusCode;
use thiserror::Error;

use crate::models::RateLimitStatus;

pub const RATE_LIMIT_MESSAGE: &str = "Too many requests from this IP, please try again later.";

/// Terminal failures of the request pipeline. Each one is raised by the stage
/// that detects it and turned into a JSON response by `handle_rejection`.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid upstream URI: {0}")]
    InvalidUri(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Upstream request timed out")]
    Timeout,

    #[error("Rate limit exceeded ({} requests per window)", .0.limit)]
    RateLimitExceeded(RateLimitStatus),

    #[error("Body exceeds limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Failed to read request body: {0}")]
    BodyRead(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidUri(_) | Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BodyRead(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Message safe to show to the caller. Upstream and I/O details stay in
    /// the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidUri(_) | Self::Upstream(_) => "Bad gateway",
            Self::Timeout => "Gateway timeout",
            Self::RateLimitExceeded(_) => RATE_LIMIT_MESSAGE,
            Self::PayloadTooLarge { .. } => "Payload too large",
            Self::BodyRead(_) => "Invalid request body",
        }
    }
}

impl GatewayError {
    /// Looks for a gateway error carried in `err` or its source chain, such
    /// as a body ceiling tripped while hyper was writing the request body.
    pub fn find_in<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a GatewayError> {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(found) = e.downcast_ref::<GatewayError>() {
                return Some(found);
            }
            current = e.source();
        }
        None
    }
}

impl warp::reject::Reject for GatewayError {}
