//! Plain-text responses for requests the throttle does not forward.

use axum::body::Body;
use axum::response::Response;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER};
use http::StatusCode;
use std::time::Duration;

/// Body sent with 503 when the quota is exhausted.
pub const OVER_RATE_LIMIT: &str = "Over Rate Limit";
/// Body sent with 400 when no usable identity was found.
pub const BAD_REQUEST: &str = "Bad Request";
/// Body sent with 500 when the counter store fails in an unexpected way.
pub const INTERNAL_ERROR: &str = "Internal Server Error";

fn plain_text(status: StatusCode, body: &'static str) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    response
}

/// 503 with `Retry-After` set to the seconds left in the current window.
pub fn over_rate_limit(retry_after: Duration) -> Response {
    let mut response = plain_text(StatusCode::SERVICE_UNAVAILABLE, OVER_RATE_LIMIT);
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after.as_secs().max(1)));
    response
}

pub fn bad_request() -> Response {
    plain_text(StatusCode::BAD_REQUEST, BAD_REQUEST)
}

pub fn internal_error() -> Response {
    plain_text(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_over_rate_limit() {
        let response = over_rate_limit(Duration::from_secs(42));

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(response.headers()[CONTENT_LENGTH], "15");
        assert_eq!(response.headers()[RETRY_AFTER], "42");
        assert_eq!(body_text(response).await, "Over Rate Limit");
    }

    #[tokio::test]
    async fn test_bad_request() {
        let response = bad_request();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(response.headers()[CONTENT_LENGTH], "11");
        assert_eq!(body_text(response).await, "Bad Request");
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        let response = over_rate_limit(Duration::from_millis(200));
        assert_eq!(response.headers()[RETRY_AFTER], "1");
    }
}
