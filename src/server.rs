//! Demo HTTP server with the throttle in front of an echo handler.

use axum::extract::Request;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{Result, TurnstileError};
use crate::middleware::{BasicAuthIdentity, ThrottleLayer};
use crate::ratelimit::{Identity, ThrottleDecider};

/// HTTP server for the demo service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The decider shared by every request
    decider: Arc<ThrottleDecider>,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, decider: Arc<ThrottleDecider>) -> Self {
        Self { addr, decider }
    }

    /// The application router, throttled by Basic-auth user name.
    ///
    /// `/health` is mounted outside the throttle.
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(echo)
            .layer(
                ThrottleLayer::new(Arc::clone(&self.decider))
                    .with_identity_source(BasicAuthIdentity),
            )
            .route("/health", get(health))
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %self.addr,
            decider = ?self.decider,
            "Starting HTTP server"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                TurnstileError::Server(e.to_string())
            })
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn echo(req: Request) -> String {
    let who = req
        .extensions()
        .get::<Identity>()
        .map(Identity::to_string)
        .unwrap_or_else(|| "anonymous".to_string());
    format!("Hello, {}! You asked for {} {}\n", who, req.method(), req.uri().path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use http::StatusCode;
    use tower::ServiceExt;

    fn server(limit: u64) -> HttpServer {
        let decider = ThrottleDecider::builder(Arc::new(MemoryStore::new()))
            .requests_per_limit(limit)
            .build()
            .unwrap();
        HttpServer::new("127.0.0.1:0".parse().unwrap(), Arc::new(decider))
    }

    fn as_user(user: &str, path: &str) -> Request {
        Request::builder()
            .uri(path)
            .header("authorization", format!("Basic {}", STANDARD.encode(format!("{}:pw", user))))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_echo_sees_identity() {
        let response = server(5).router().oneshot(as_user("joe", "/hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Hello, joe! You asked for GET /hello\n");
    }

    #[tokio::test]
    async fn test_health_is_never_throttled() {
        let router = server(1).router();
        for _ in 0..3 {
            let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
            let response = router.clone().oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_quota_enforced_per_user() {
        let router = server(1).router();

        let first = router.clone().oneshot(as_user("joe", "/")).await.unwrap();
        let second = router.clone().oneshot(as_user("joe", "/")).await.unwrap();
        let other = router.clone().oneshot(as_user("jane", "/")).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(other.status(), StatusCode::OK);
    }
}
