//! Rate Limiting
//!
//! Token bucket rate limiter applied to inbound frames, keyed by the remote
//! address so that opening extra connections does not buy extra budget.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Token bucket for a single remote address.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    /// Tokens added per second.
    refill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(max_tokens: u32) -> Self {
        TokenBucket {
            tokens: max_tokens as f64,
            max_tokens: max_tokens as f64,
            refill_rate: max_tokens as f64 / 60.0,
            last_update: Instant::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-address rate limiter shared by all connection handlers.
pub struct RateLimiter {
    buckets: RwLock<HashMap<IpAddr, TokenBucket>>,
    max_per_minute: u32,
}

impl RateLimiter {
    /// `max_per_minute` is both the burst size and the sustained per-minute rate.
    pub fn new(max_per_minute: u32) -> Self {
        RateLimiter {
            buckets: RwLock::new(HashMap::new()),
            max_per_minute,
        }
    }

    /// Tries to consume a token for `addr`.
    ///
    /// Returns true if allowed, false if rate limited.
    pub fn consume(&self, addr: IpAddr) -> bool {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        buckets
            .entry(addr)
            .or_insert_with(|| TokenBucket::new(self.max_per_minute))
            .try_consume()
    }

    /// Drops buckets idle for longer than `max_idle`. Returns how many were removed.
    pub fn cleanup_inactive(&self, max_idle: Duration) -> usize {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let initial_count = buckets.len();

        buckets.retain(|_, bucket| now.duration_since(bucket.last_update) < max_idle);

        initial_count - buckets.len()
    }

    /// Returns the number of addresses currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
