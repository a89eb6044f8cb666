//! Local request rate limiting.
//!
//! One token bucket per thing plus a global bucket, all over 1-second
//! windows. The per-thing registry is an LRU so a burst of distinct
//! thing names cannot grow it without bound.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use um_protocol::errors::{ShadowError, Throttle};

const DEFAULT_REGISTRY_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    rate: u32,
    window_start: Instant,
    used: u32,
}

impl TokenBucket {
    fn new(rate: u32) -> Self {
        Self {
            rate,
            window_start: Instant::now(),
            used: 0,
        }
    }

    /// Take one token. A zero rate disables the bucket.
    fn try_acquire(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.used = 0;
        }
        if self.rate == 0 {
            return true;
        }
        if self.used < self.rate {
            self.used += 1;
            true
        } else {
            false
        }
    }
}

struct PerThingRegistry {
    buckets: LruCache<String, TokenBucket>,
    rate: u32,
}

/// Per-thing plus global token-bucket limiter.
pub struct RateLimiter {
    total: Mutex<TokenBucket>,
    per_thing: Mutex<PerThingRegistry>,
}

impl RateLimiter {
    pub fn new(total_rate: u32, per_thing_rate: u32) -> Self {
        Self::with_capacity(total_rate, per_thing_rate, DEFAULT_REGISTRY_CAPACITY)
    }

    pub fn with_capacity(total_rate: u32, per_thing_rate: u32, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero capacity");
        Self {
            total: Mutex::new(TokenBucket::new(total_rate)),
            per_thing: Mutex::new(PerThingRegistry {
                buckets: LruCache::new(capacity),
                rate: per_thing_rate,
            }),
        }
    }

    /// Take one token for a request against `thing_name`.
    ///
    /// The global bucket is checked first. An empty thing name
    /// short-circuits to success; internal paths use it.
    pub fn acquire(&self, thing_name: &str) -> Result<(), ShadowError> {
        if thing_name.is_empty() {
            return Ok(());
        }
        let now = Instant::now();

        if !self.total.lock().unwrap().try_acquire(now) {
            return Err(ShadowError::Throttled(Throttle::Total));
        }

        let mut registry = self.per_thing.lock().unwrap();
        let rate = registry.rate;
        if registry.buckets.get(thing_name).is_none() {
            // At capacity this evicts the least-recently-used thing.
            registry
                .buckets
                .push(thing_name.to_string(), TokenBucket::new(rate));
        }
        let bucket = registry
            .buckets
            .get_mut(thing_name)
            .expect("bucket just inserted");
        if bucket.try_acquire(now) {
            Ok(())
        } else {
            Err(ShadowError::Throttled(Throttle::PerThing))
        }
    }

    /// Change the per-thing rate; applies to existing buckets as well.
    pub fn set_per_thing_rate(&self, rate: u32) {
        let mut registry = self.per_thing.lock().unwrap();
        registry.rate = rate;
        for (_, bucket) in registry.buckets.iter_mut() {
            bucket.rate = rate;
        }
    }

    /// Change the global rate.
    pub fn set_total_rate(&self, rate: u32) {
        self.total.lock().unwrap().rate = rate;
    }

    /// Drop every per-thing bucket and reset the global window.
    pub fn clear(&self) {
        let mut registry = self.per_thing.lock().unwrap();
        registry.buckets.clear();
        let rate = self.total.lock().unwrap().rate;
        *self.total.lock().unwrap() = TokenBucket::new(rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_thing_limit_enforced_within_window() {
        let limiter = RateLimiter::new(100, 3);
        for _ in 0..3 {
            limiter.acquire("gw-01").unwrap();
        }
        let err = limiter.acquire("gw-01").unwrap_err();
        assert_eq!(err, ShadowError::Throttled(Throttle::PerThing));

        // A different thing has its own bucket.
        limiter.acquire("gw-02").unwrap();
    }

    #[test]
    fn total_limit_checked_first() {
        let limiter = RateLimiter::new(2, 100);
        limiter.acquire("a").unwrap();
        limiter.acquire("b").unwrap();
        let err = limiter.acquire("c").unwrap_err();
        assert_eq!(err, ShadowError::Throttled(Throttle::Total));
    }

    #[test]
    fn empty_thing_short_circuits() {
        let limiter = RateLimiter::new(1, 1);
        limiter.acquire("gw-01").unwrap();
        // Internal paths are never throttled.
        for _ in 0..10 {
            limiter.acquire("").unwrap();
        }
    }

    #[test]
    fn window_advance_resets_count() {
        let mut bucket = TokenBucket::new(2);
        let start = Instant::now();
        assert!(bucket.try_acquire(start));
        assert!(bucket.try_acquire(start));
        assert!(!bucket.try_acquire(start));

        let later = start + Duration::from_millis(1100);
        assert!(bucket.try_acquire(later));
    }

    #[test]
    fn zero_rate_disables_bucket() {
        let mut bucket = TokenBucket::new(0);
        let now = Instant::now();
        for _ in 0..1000 {
            assert!(bucket.try_acquire(now));
        }
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let limiter = RateLimiter::with_capacity(100, 1, 2);
        limiter.acquire("a").unwrap();
        limiter.acquire("b").unwrap();
        // Inserting a third thing evicts "a", whose bucket resets.
        limiter.acquire("c").unwrap();
        limiter.acquire("a").unwrap();
    }

    #[test]
    fn rate_change_applies_to_existing_buckets() {
        let limiter = RateLimiter::new(100, 1);
        limiter.acquire("gw-01").unwrap();
        assert!(limiter.acquire("gw-01").is_err());

        limiter.set_per_thing_rate(5);
        // Same window, but the raised rate admits more requests.
        limiter.acquire("gw-01").unwrap();
    }

    #[test]
    fn clear_resets_state() {
        let limiter = RateLimiter::new(100, 1);
        limiter.acquire("gw-01").unwrap();
        assert!(limiter.acquire("gw-01").is_err());
        limiter.clear();
        limiter.acquire("gw-01").unwrap();
    }
}
