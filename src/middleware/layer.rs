//! Tower layer applying throttle decisions to HTTP requests.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use axum::Router;
//! use turnstile::middleware::{BasicAuthIdentity, ThrottleLayer};
//! use turnstile::ratelimit::ThrottleDecider;
//!
//! let decider = Arc::new(ThrottleDecider::from_config(&config.throttle)?);
//! let app = Router::new()
//!     .route("/", get(handler))
//!     .layer(ThrottleLayer::new(decider).with_identity_source(BasicAuthIdentity));
//! ```

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{error, instrument};

use super::identity::{ExtensionIdentity, IdentityOutcome, IdentitySource};
use super::response;
use crate::ratelimit::{Decision, RequestContext, ThrottleDecider};

/// Tower layer for throttling.
///
/// `I` chooses where the subject's identity comes from; by default it is
/// read from request extensions set by an upstream authentication layer.
pub struct ThrottleLayer<I = ExtensionIdentity> {
    decider: Arc<ThrottleDecider>,
    identity: Arc<I>,
}

impl ThrottleLayer<ExtensionIdentity> {
    pub fn new(decider: Arc<ThrottleDecider>) -> Self {
        Self {
            decider,
            identity: Arc::new(ExtensionIdentity),
        }
    }
}

impl<I: IdentitySource> ThrottleLayer<I> {
    /// Use a different identity source.
    pub fn with_identity_source<J: IdentitySource>(self, identity: J) -> ThrottleLayer<J> {
        ThrottleLayer {
            decider: self.decider,
            identity: Arc::new(identity),
        }
    }
}

impl<I> Clone for ThrottleLayer<I> {
    fn clone(&self) -> Self {
        Self {
            decider: Arc::clone(&self.decider),
            identity: Arc::clone(&self.identity),
        }
    }
}

impl<S, I: IdentitySource> Layer<S> for ThrottleLayer<I> {
    type Service = ThrottleService<S, I>;

    fn layer(&self, inner: S) -> Self::Service {
        ThrottleService {
            inner,
            decider: Arc::clone(&self.decider),
            identity: Arc::clone(&self.identity),
        }
    }
}

/// Tower service for throttling.
pub struct ThrottleService<S, I = ExtensionIdentity> {
    inner: S,
    decider: Arc<ThrottleDecider>,
    identity: Arc<I>,
}

impl<S: Clone, I> Clone for ThrottleService<S, I> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            decider: Arc::clone(&self.decider),
            identity: Arc::clone(&self.identity),
        }
    }
}

impl<S, I> Service<Request> for ThrottleService<S, I>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Response: IntoResponse,
    S::Error: Send,
    S::Future: Send + 'static,
    I: IdentitySource,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let ctx = RequestContext::new(req.method().as_str(), req.uri().path());
        let identity = self.identity.identify(&req);
        let decider = Arc::clone(&self.decider);

        // The clone may not be ready; keep the service that was polled.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(throttle(decider, ctx, identity, inner, req))
    }
}

#[instrument(skip_all, fields(method = %ctx.method, path = %ctx.path))]
async fn throttle<S>(
    decider: Arc<ThrottleDecider>,
    ctx: RequestContext,
    identity: IdentityOutcome,
    mut inner: S,
    mut req: Request,
) -> Result<Response, S::Error>
where
    S: Service<Request>,
    S::Response: IntoResponse,
{
    let decision = match decider.decide(&ctx, identity.identity()).await {
        Ok(decision) => decision,
        Err(e) => {
            error!(error = %e, "Throttle decision failed");
            return Ok(response::internal_error());
        }
    };

    match decision {
        Decision::Allow | Decision::Unthrottled => {
            if let IdentityOutcome::Authenticated(identity) = identity {
                req.extensions_mut().insert(identity);
            }
            inner.call(req).await.map(IntoResponse::into_response)
        }
        Decision::Reject => Ok(response::over_rate_limit(
            decider.policy().retry_after(ctx.arrived_at),
        )),
        Decision::BadRequest => Ok(response::bad_request()),
    }
}
