//! Throttling key generation.
//!
//! A key names one counting window for one subject. The default strategy
//! joins the identity and the window bucket label; callers can replace the
//! key shape entirely with their own function.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

use super::window::TimeWindow;

/// The subject being throttled, as supplied by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Create an identity from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identity {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Identity {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the decider knows about an inbound request.
///
/// The arrival time is captured once, when the context is built, so key
/// derivation never consults the clock itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Request path, without query string
    pub path: String,
    /// HTTP method
    pub method: String,
    /// When the request arrived
    pub arrived_at: DateTime<Utc>,
}

impl RequestContext {
    /// Context for a request arriving now.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self::at(method, path, Utc::now())
    }

    /// Context for a request that arrived at a fixed instant.
    pub fn at(method: impl Into<String>, path: impl Into<String>, arrived_at: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            arrived_at,
        }
    }
}

/// A key identifying one counter in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strategy for deriving a throttling key from a request.
///
/// Returning `None` means the request cannot be attributed to any counter
/// and passes through unthrottled.
pub trait KeyStrategy: Send + Sync {
    fn derive(&self, ctx: &RequestContext, identity: Option<&Identity>) -> Option<RateLimitKey>;
}

/// The default strategy: `{identity}_{bucket}`.
///
/// Requests without an identity yield no key.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityWindowKey {
    window: TimeWindow,
}

impl IdentityWindowKey {
    pub fn new(window: TimeWindow) -> Self {
        Self { window }
    }
}

impl KeyStrategy for IdentityWindowKey {
    fn derive(&self, ctx: &RequestContext, identity: Option<&Identity>) -> Option<RateLimitKey> {
        let identity = identity?;
        Some(RateLimitKey(format!(
            "{}_{}",
            identity,
            self.window.bucket_label(ctx.arrived_at)
        )))
    }
}

/// Adapter turning a plain function into a [`KeyStrategy`].
///
/// The function always produces a key, identity or not.
pub struct KeyFn<F>(pub F);

impl<F> KeyStrategy for KeyFn<F>
where
    F: Fn(&RequestContext, Option<&Identity>) -> String + Send + Sync,
{
    fn derive(&self, ctx: &RequestContext, identity: Option<&Identity>) -> Option<RateLimitKey> {
        Some(RateLimitKey((self.0)(ctx, identity)))
    }
}

/// Derives keys using the configured strategy.
#[derive(Clone)]
pub struct KeyGenerator {
    strategy: Arc<dyn KeyStrategy>,
}

impl KeyGenerator {
    /// Generator using the default identity + bucket strategy.
    pub fn for_window(window: TimeWindow) -> Self {
        Self::with_strategy(Arc::new(IdentityWindowKey::new(window)))
    }

    pub fn with_strategy(strategy: Arc<dyn KeyStrategy>) -> Self {
        Self { strategy }
    }

    /// Generate the key for a request, if it can be attributed to one.
    pub fn generate(&self, ctx: &RequestContext, identity: Option<&Identity>) -> Option<RateLimitKey> {
        self.strategy.derive(ctx, identity)
    }
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGenerator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx_at(path: &str, hour: u32, minute: u32) -> RequestContext {
        RequestContext::at(
            "GET",
            path,
            Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap(),
        )
    }

    #[test]
    fn test_default_key_shape() {
        let keys = KeyGenerator::for_window(TimeWindow::Hour);
        let key = keys
            .generate(&ctx_at("/", 13, 5), Some(&Identity::from("joe")))
            .unwrap();
        assert_eq!(key.as_str(), "joe_2024-03-01-13");
    }

    #[test]
    fn test_same_bucket_same_key() {
        let keys = KeyGenerator::for_window(TimeWindow::Hour);
        let joe = Identity::from("joe");
        let a = keys.generate(&ctx_at("/a", 13, 0), Some(&joe));
        let b = keys.generate(&ctx_at("/b", 13, 59), Some(&joe));
        assert_eq!(a, b);
    }

    #[test]
    fn test_next_bucket_new_key() {
        let keys = KeyGenerator::for_window(TimeWindow::Hour);
        let joe = Identity::from("joe");
        let a = keys.generate(&ctx_at("/", 13, 59), Some(&joe));
        let b = keys.generate(&ctx_at("/", 14, 0), Some(&joe));
        assert_ne!(a, b);
    }

    #[test]
    fn test_default_strategy_needs_identity() {
        let keys = KeyGenerator::for_window(TimeWindow::Hour);
        assert!(keys.generate(&ctx_at("/", 13, 0), None).is_none());
    }

    fn path_key(ctx: &RequestContext, _identity: Option<&Identity>) -> String {
        format!("path:{}", ctx.path)
    }

    #[test]
    fn test_custom_strategy_by_path() {
        let keys = KeyGenerator::with_strategy(Arc::new(KeyFn(path_key)));

        let joe = keys.generate(&ctx_at("/search", 13, 0), Some(&Identity::from("joe")));
        let jane = keys.generate(&ctx_at("/search", 13, 0), Some(&Identity::from("jane")));
        let anonymous = keys.generate(&ctx_at("/search", 13, 0), None);

        assert_eq!(joe, jane);
        assert_eq!(joe, anonymous);
        assert_eq!(joe.unwrap().as_str(), "path:/search");
    }
}
