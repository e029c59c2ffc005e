#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use warp::http::StatusCode;
    use warp::reply::Response;

    use crate::errors::RATE_LIMIT_MESSAGE;
    use crate::handlers::handle_rejection;
    use crate::models::RateLimitStatus;
    use crate::GatewayError;

    async fn json_body(response: Response) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_handle_not_found_rejection() {
        let rejection = warp::reject::not_found();
        let response = handle_rejection(rejection).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_handle_rate_limit_rejection() {
        let status = RateLimitStatus {
            limit: 100,
            remaining: 0,
            reset: Duration::from_secs(30),
            window: Duration::from_secs(900),
        };
        let rejection = warp::reject::custom(GatewayError::RateLimitExceeded(status));
        let response = handle_rejection(rejection).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("ratelimit-limit").unwrap(), "100");
        assert_eq!(response.headers().get("ratelimit-remaining").unwrap(), "0");
        assert_eq!(response.headers().get("ratelimit-reset").unwrap(), "30");
        assert_eq!(response.headers().get("retry-after").unwrap(), "30");
        assert_eq!(
            json_body(response).await,
            serde_json::json!({ "error": RATE_LIMIT_MESSAGE })
        );
    }

    #[tokio::test]
    async fn test_handle_timeout_rejection() {
        let rejection = warp::reject::custom(GatewayError::Timeout);
        let response = handle_rejection(rejection).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_handle_upstream_rejection_hides_details() {
        let rejection = warp::reject::custom(GatewayError::Upstream(
            "error trying to connect: tcp connect error: Connection refused (os error 111)"
                .to_string(),
        ));
        let response = handle_rejection(rejection).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({ "error": "Bad gateway" })
        );
    }

    #[tokio::test]
    async fn test_handle_payload_too_large_rejection() {
        let rejection = warp::reject::custom(GatewayError::PayloadTooLarge { limit: 10 });
        let response = handle_rejection(rejection).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(response.headers().get("ratelimit-limit").is_none());
    }

    #[tokio::test]
    async fn test_handle_body_read_rejection() {
        let rejection = warp::reject::custom(GatewayError::BodyRead("reset".to_string()));
        let response = handle_rejection(rejection).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
