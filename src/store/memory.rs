//! In-process counter store.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::{CounterStore, StoreError};
use crate::ratelimit::RateLimitKey;

/// How often expired counters are swept out of the map.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Slot {
    count: u64,
    expires_at: Option<Instant>,
}

impl Slot {
    fn fresh(now: Instant, expiry: Option<Duration>) -> Self {
        Self {
            count: 0,
            expires_at: expiry.map(|ttl| now + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Counter store backed by a sharded concurrent map.
///
/// Increments hold the shard lock for the key, so updates to one key are
/// linearizable. Counts are local to this process.
#[derive(Debug)]
pub struct MemoryStore {
    counters: DashMap<String, Slot>,
    expiry: Option<Duration>,
    max_entries: Option<usize>,
    last_sweep: Mutex<Instant>,
}

impl MemoryStore {
    /// A store whose counters never expire.
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            expiry: None,
            max_entries: None,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// A store whose counters expire `expiry` after their first increment.
    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            expiry: Some(expiry),
            ..Self::new()
        }
    }

    /// Cap the number of live counters.
    ///
    /// Once the cap is reached and a sweep frees nothing, increments for new
    /// keys fail with [`StoreError::Backend`]. The throttle layer answers
    /// those subjects with 500 while existing counters keep working.
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Number of counters currently held, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Remove expired counters now.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.counters.len())
    }

    /// Clear all counters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.counters.clear();
    }

    fn maybe_sweep(&self, now: Instant) {
        if self.expiry.is_none() {
            return;
        }
        let Some(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if now.duration_since(*last) < SWEEP_INTERVAL {
            return;
        }
        *last = now;
        drop(last);

        let purged = self.purge_expired();
        if purged > 0 {
            debug!(purged, remaining = self.counters.len(), "Swept expired counters");
        }
    }

    /// A full store sweeps once before refusing a new key.
    fn check_capacity(&self, key: &str) -> Result<(), StoreError> {
        let Some(max) = self.max_entries else {
            return Ok(());
        };
        let full = || self.counters.len() >= max && !self.counters.contains_key(key);
        if full() {
            self.purge_expired();
        }
        if full() {
            return Err(StoreError::Backend(format!(
                "memory counter store is full ({} entries)",
                max
            )));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &RateLimitKey) -> Result<u64, StoreError> {
        let now = Instant::now();
        self.maybe_sweep(now);
        self.check_capacity(key.as_str())?;

        let mut slot = self
            .counters
            .entry(key.as_str().to_string())
            .or_insert_with(|| Slot::fresh(now, self.expiry));

        if slot.is_expired(now) {
            *slot = Slot::fresh(now, self.expiry);
        }
        slot.count += 1;

        trace!(key = %key, count = slot.count, "Incremented counter");
        Ok(slot.count)
    }

    async fn get(&self, key: &RateLimitKey) -> Result<u64, StoreError> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key.as_str())
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.count)
            .unwrap_or(0))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
