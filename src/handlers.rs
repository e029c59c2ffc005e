use std::convert::Infallible;
use std::sync::Arc;

use http::StatusCode;
use hyper::{HeaderMap, Method};
use tracing::{debug, error};
use warp::filters::cors::CorsForbidden;
use warp::path::FullPath;
use warp::reply::Response;
use warp::Reply;

use crate::errors::GatewayError;
use crate::middleware::{
    add_rate_limit_headers, add_rate_limit_headers_unless_present, add_retry_after,
};
use crate::models::{Admission, ErrorMessage, WelcomeMessage};
use crate::services::proxy::UpstreamClient;

#[cfg(test)]
mod tests;

/// Maps every rejection to a JSON `{"error": ...}` body. Internal detail is
/// logged, never returned.
pub async fn handle_rejection(err: warp::Rejection) -> Result<Response, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found")
    } else if let Some(e) = err.find::<GatewayError>() {
        let mut response = json_error(e.status_code(), e.public_message());
        if let GatewayError::RateLimitExceeded(status) = e {
            add_rate_limit_headers(response.headers_mut(), status);
            add_retry_after(response.headers_mut(), status);
        } else {
            debug!(error = %e, "Request rejected");
        }
        return Ok(response);
    } else if err.find::<CorsForbidden>().is_some() {
        (StatusCode::FORBIDDEN, "Not allowed by CORS")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        error!(rejection = ?err, "Unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(json_error(code, message))
}

fn json_error(code: StatusCode, message: &str) -> Response {
    let body = ErrorMessage {
        error: message.to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), code).into_response()
}

pub fn welcome(admission: Admission) -> Response {
    let body = WelcomeMessage {
        message: "Welcome to api-gateway!".to_string(),
    };
    let mut response = warp::reply::json(&body).into_response();
    add_rate_limit_headers(response.headers_mut(), &admission.status);
    response
}

pub fn serve_asset(admission: Admission, file: warp::fs::File) -> Response {
    let mut response = file.into_response();
    add_rate_limit_headers(response.headers_mut(), &admission.status);
    response
}

/// Terminal stage: relays the admitted request to the upstream service.
pub async fn forward(
    method: Method,
    full_path: FullPath,
    query: String,
    headers: HeaderMap,
    admission: Admission,
    upstream: Arc<UpstreamClient>,
) -> Result<Response, warp::Rejection> {
    let mut path_and_query = full_path.as_str().to_string();
    if !query.is_empty() {
        path_and_query.push('?');
        path_and_query.push_str(&query);
    }

    let Admission { status, body, .. } = admission;
    let mut response = upstream
        .forward(method, &path_and_query, &headers, body)
        .await
        .map_err(warp::reject::custom)?;

    add_rate_limit_headers_unless_present(response.headers_mut(), &status);
    Ok(response)
}
