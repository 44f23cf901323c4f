//! Networked counter store backed by Redis.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::trace;

use super::{CounterStore, StoreError};
use crate::ratelimit::RateLimitKey;

/// Redis counter store.
///
/// Each increment runs `INCR` and `EXPIRE ... NX` in one `MULTI`/`EXEC`
/// pipeline, so every process sharing the Redis instance sees one total order
/// per key. The TTL is set only by the increment that creates the key and
/// never slides with later traffic, matching [`MemoryStore`] expiry. `NX`
/// needs Redis 7.0 or later.
///
/// Every call, connection setup included, is bounded by the store's timeout.
///
/// [`MemoryStore`]: super::MemoryStore
#[derive(Clone)]
pub struct RedisStore {
    client: ::redis::Client,
    expiry: Option<Duration>,
    timeout: Duration,
}

impl RedisStore {
    /// Create a store from a connection URL such as `redis://127.0.0.1/`.
    ///
    /// No connection is made until the first call.
    pub fn new(url: &str, expiry: Option<Duration>, timeout: Duration) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(url)
            .map_err(|e| StoreError::Backend(format!("Invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            expiry,
            timeout,
        })
    }

    /// Run a Redis operation under the store timeout.
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = ::redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify(op, e)),
            Err(_) => Err(StoreError::Unavailable(format!(
                "Redis {} timed out after {:?}",
                op, self.timeout
            ))),
        }
    }
}

/// Connection-level failures make the store unavailable; anything else
/// (wrong reply type, server-side error) is a backend fault.
fn classify(op: &str, err: ::redis::RedisError) -> StoreError {
    if err.is_timeout()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_io_error()
    {
        StoreError::Unavailable(format!("Redis {} failed: {}", op, err))
    } else {
        StoreError::Backend(format!("Redis {} failed: {}", op, err))
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &RateLimitKey) -> Result<u64, StoreError> {
        let count = self
            .bounded("INCR", async {
                let mut conn = self.client.get_multiplexed_async_connection().await?;

                let mut pipe = ::redis::pipe();
                pipe.atomic().incr(key.as_str(), 1u64);
                if let Some(ttl) = self.expiry {
                    pipe.cmd("EXPIRE")
                        .arg(key.as_str())
                        .arg(ttl.as_secs().max(1))
                        .arg("NX")
                        .ignore();
                }

                let (count,): (u64,) = pipe.query_async(&mut conn).await?;
                Ok(count)
            })
            .await?;

        trace!(key = %key, count, "Incremented Redis counter");
        Ok(count)
    }

    async fn get(&self, key: &RateLimitKey) -> Result<u64, StoreError> {
        let value = self
            .bounded("GET", async {
                let mut conn = self.client.get_multiplexed_async_connection().await?;
                ::redis::cmd("GET")
                    .arg(key.as_str())
                    .query_async::<Option<u64>>(&mut conn)
                    .await
            })
            .await?;

        Ok(value.unwrap_or(0))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_is_backend_error() {
        let err = RedisStore::new("not a url", None, Duration::from_millis(50))
            .err()
            .unwrap();
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn test_refused_connection_is_unavailable() {
        // Nothing listens on port 1
        let store = RedisStore::new("redis://127.0.0.1:1/", None, Duration::from_millis(500)).unwrap();
        let err = store.increment(&RateLimitKey::new("joe")).await.unwrap_err();
        assert!(err.is_unavailable(), "unexpected error: {}", err);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_increment() {
        let store = RedisStore::new(
            "redis://127.0.0.1/",
            Some(Duration::from_secs(60)),
            Duration::from_secs(1),
        )
        .unwrap();
        let key = RateLimitKey::new(format!("turnstile-test-{}", std::process::id()));

        assert_eq!(store.increment(&key).await.unwrap(), 1);
        assert_eq!(store.increment(&key).await.unwrap(), 2);
        assert_eq!(store.get(&key).await.unwrap(), 2);
    }

    #[tokio::test]
    #[ignore] // Requires Redis 7
    async fn test_redis_ttl_is_fixed_at_first_increment() {
        let store = RedisStore::new(
            "redis://127.0.0.1/",
            Some(Duration::from_secs(60)),
            Duration::from_secs(1),
        )
        .unwrap();
        let key = RateLimitKey::new(format!("turnstile-ttl-test-{}", std::process::id()));
        let mut conn = store.client.get_multiplexed_async_connection().await.unwrap();

        assert_eq!(store.increment(&key).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(store.increment(&key).await.unwrap(), 2);

        let ttl: i64 = ::redis::cmd("TTL")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(ttl > 0 && ttl < 60, "TTL moved with the second increment: {}", ttl);

        let _: () = ::redis::cmd("DEL")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await
            .unwrap();
    }
}
