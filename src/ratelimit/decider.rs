//! The throttle decision engine.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::key::{Identity, KeyFn, KeyGenerator, KeyStrategy, RequestContext};
use super::policy::{RateLimitPolicy, Verdict, DEFAULT_REQUESTS_PER_LIMIT};
use super::window::TimeWindow;
use crate::config::ThrottleConfig;
use crate::error::{Result, TurnstileError};
use crate::store::{build_store, SharedStore};

/// What to do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Within quota; forward the request.
    Allow,
    /// Over quota; answer 503.
    Reject,
    /// An identity was required but none was usable; answer 400.
    BadRequest,
    /// Not subject to throttling (exempt, unattributable, or the counter
    /// store is down); forward the request.
    Unthrottled,
}

impl Decision {
    /// Whether the request should reach the downstream service.
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Decision::Allow | Decision::Unthrottled)
    }
}

impl From<Verdict> for Decision {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Allow => Decision::Allow,
            Verdict::Reject => Decision::Reject,
        }
    }
}

/// Decides, per request, whether a subject is within its quota.
///
/// The decider keeps no state of its own. It is safe to share across tasks;
/// the counter store is the only shared resource and owns all atomicity.
pub struct ThrottleDecider {
    store: SharedStore,
    keys: KeyGenerator,
    policy: RateLimitPolicy,
    auth: bool,
    exempt_paths: Vec<String>,
}

impl ThrottleDecider {
    /// Start building a decider around an explicitly constructed store.
    pub fn builder(store: SharedStore) -> ThrottleDeciderBuilder {
        ThrottleDeciderBuilder::new(store)
    }

    /// Build a decider, and its store, from configuration.
    pub fn from_config(config: &ThrottleConfig) -> Result<Self> {
        let store = build_store(&config.backend, config.window)?;
        Self::builder(store)
            .requests_per_limit(config.requests_per_limit)
            .window(config.window)
            .auth(config.auth)
            .exempt_paths(config.exempt_paths.iter().cloned())
            .build()
    }

    /// Decide what to do with one request.
    ///
    /// An unavailable counter store fails open. Every other store error is
    /// returned to the caller.
    pub async fn decide(&self, ctx: &RequestContext, identity: Option<&Identity>) -> Result<Decision> {
        if self.is_exempt(&ctx.path) {
            trace!(path = %ctx.path, "Path is exempt from throttling");
            return Ok(Decision::Unthrottled);
        }

        if self.auth && identity.is_none() {
            debug!(path = %ctx.path, "No usable identity while authentication is required");
            return Ok(Decision::BadRequest);
        }

        let Some(key) = self.keys.generate(ctx, identity) else {
            trace!(path = %ctx.path, "Request cannot be attributed to a counter");
            return Ok(Decision::Unthrottled);
        };

        trace!(key = %key, "Checking rate limit");

        let count = match self.store.increment(&key).await {
            Ok(count) => count,
            Err(e) if e.is_unavailable() => {
                warn!(
                    key = %key,
                    backend = self.store.backend_name(),
                    error = %e,
                    "Counter store unavailable, failing open"
                );
                return Ok(Decision::Unthrottled);
            }
            Err(e) => return Err(TurnstileError::Store(e)),
        };

        if count == 1 {
            debug!(
                key = %key,
                limit = self.policy.requests_per_limit(),
                window = ?self.policy.window(),
                "Started new rate limit window"
            );
        }

        let decision = Decision::from(self.policy.evaluate(count));
        if decision == Decision::Reject {
            debug!(
                key = %key,
                count = count,
                limit = self.policy.requests_per_limit(),
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// The quota this decider enforces.
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// The counter store, for inspection.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Whether requests without an identity are refused.
    pub fn requires_auth(&self) -> bool {
        self.auth
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|exempt| {
            path == exempt
                || path
                    .strip_prefix(exempt.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

impl std::fmt::Debug for ThrottleDecider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleDecider")
            .field("backend", &self.store.backend_name())
            .field("policy", &self.policy)
            .field("auth", &self.auth)
            .field("exempt_paths", &self.exempt_paths)
            .finish()
    }
}

/// Builder for [`ThrottleDecider`].
pub struct ThrottleDeciderBuilder {
    store: SharedStore,
    requests_per_limit: u64,
    window: TimeWindow,
    auth: bool,
    exempt_paths: Vec<String>,
    key_strategy: Option<Arc<dyn KeyStrategy>>,
}

impl ThrottleDeciderBuilder {
    fn new(store: SharedStore) -> Self {
        Self {
            store,
            requests_per_limit: DEFAULT_REQUESTS_PER_LIMIT,
            window: TimeWindow::default(),
            auth: true,
            exempt_paths: Vec::new(),
            key_strategy: None,
        }
    }

    /// Requests admitted per key per window.
    pub fn requests_per_limit(mut self, limit: u64) -> Self {
        self.requests_per_limit = limit;
        self
    }

    pub fn window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    /// Require an identity on every request.
    pub fn auth(mut self, auth: bool) -> Self {
        self.auth = auth;
        self
    }

    /// Never throttle this path or anything beneath it.
    ///
    /// A trailing `/` is ignored, so `/health/` covers `/health/live` and
    /// `/` covers every path.
    pub fn exempt_path(mut self, path: impl Into<String>) -> Self {
        self.exempt_paths.push(normalize_exempt(path.into()));
        self
    }

    pub fn exempt_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exempt_paths
            .extend(paths.into_iter().map(|path| normalize_exempt(path.into())));
        self
    }

    /// Replace the default key strategy.
    pub fn key_strategy(mut self, strategy: Arc<dyn KeyStrategy>) -> Self {
        self.key_strategy = Some(strategy);
        self
    }

    /// Replace the default key strategy with a plain function.
    ///
    /// The function must be pure: the same context and identity always
    /// give the same key.
    pub fn key_fn<F>(self, f: F) -> Self
    where
        F: Fn(&RequestContext, Option<&Identity>) -> String + Send + Sync + 'static,
    {
        self.key_strategy(Arc::new(KeyFn(f)))
    }

    pub fn build(self) -> Result<ThrottleDecider> {
        let policy = RateLimitPolicy::new(self.requests_per_limit, self.window)?;
        let keys = match self.key_strategy {
            Some(strategy) => KeyGenerator::with_strategy(strategy),
            None => KeyGenerator::for_window(self.window),
        };

        Ok(ThrottleDecider {
            store: self.store,
            keys,
            policy,
            auth: self.auth,
            exempt_paths: self.exempt_paths,
        })
    }
}

/// Strip trailing slashes; `/` becomes the empty prefix, which every path
/// extends with a `/` segment.
fn normalize_exempt(path: String) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.len() == path.len() {
        path
    } else {
        trimmed.to_string()
    }
}
