//! Counter storage backends.
//!
//! Every backend implements [`CounterStore`]. The in-memory store is always
//! available; the Redis store requires the `redis` feature. Host applications
//! can plug in their own store by implementing the trait and injecting it
//! into the decider.

mod memory;

#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryStore;

#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::BackendConfig;
use crate::error::Result;
use crate::ratelimit::{RateLimitKey, TimeWindow};

/// Errors reported by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (connection refused, timeout, dropped
    /// connection). Callers may degrade gracefully.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// Any other failure: protocol errors, unexpected replies, a full store.
    #[error("counter store failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// A shared, atomically incremented counter store.
///
/// Implementations own atomicity: concurrent `increment` calls on one key,
/// from any number of tasks or processes, must each observe a distinct
/// post-increment value.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key`, creating it at zero first if absent,
    /// and return the post-increment value.
    async fn increment(&self, key: &RateLimitKey) -> std::result::Result<u64, StoreError>;

    /// Current value for `key`, or zero if absent.
    async fn get(&self, key: &RateLimitKey) -> std::result::Result<u64, StoreError>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// A counter store shared by every decision of one middleware instance.
pub type SharedStore = Arc<dyn CounterStore>;

/// Build the store selected by configuration.
///
/// Counters expire one window after their first increment; their keys are
/// never read again after the bucket rolls over.
pub fn build_store(config: &BackendConfig, window: TimeWindow) -> Result<SharedStore> {
    let expiry = window.duration();
    match config {
        BackendConfig::Memory { max_entries } => {
            let mut store = MemoryStore::with_expiry(expiry);
            if let Some(max) = max_entries {
                store = store.max_entries(*max);
            }
            Ok(Arc::new(store))
        }
        #[cfg(feature = "redis")]
        BackendConfig::Redis { url, timeout_ms } => {
            let store = RedisStore::new(
                url,
                Some(expiry),
                std::time::Duration::from_millis(*timeout_ms),
            )?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        BackendConfig::Redis { .. } => Err(crate::error::TurnstileError::Config(
            "Redis backend requested but turnstile was built without the `redis` feature"
                .to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_classification() {
        assert!(StoreError::Unavailable("refused".into()).is_unavailable());
        assert!(!StoreError::Backend("bad reply".into()).is_unavailable());
    }

    #[tokio::test]
    async fn test_build_memory_store() {
        let store = build_store(&BackendConfig::default(), TimeWindow::Hour).unwrap();
        assert_eq!(store.backend_name(), "memory");

        let key = RateLimitKey::new("joe_2024-03-01-13");
        assert_eq!(store.increment(&key).await.unwrap(), 1);
        assert_eq!(store.get(&key).await.unwrap(), 1);
    }

    #[cfg(not(feature = "redis"))]
    #[test]
    fn test_redis_without_feature_is_config_error() {
        let config = BackendConfig::Redis {
            url: "redis://127.0.0.1/".to_string(),
            timeout_ms: 100,
        };
        assert!(build_store(&config, TimeWindow::Hour).is_err());
    }
}
