//! Sliding-window rate limiter for login attempts.
//!
//! Per-key counters decay over a rolling window; the sweep loop calls
//! [`RateLimiter::gc`] so idle keys do not accumulate.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;

/// A rate limiter with configurable per-key limits and window duration.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum attempts allowed within the window.
    max_attempts: u32,
    /// Duration of the sliding window.
    window: Duration,
    /// Per-key tracking: key → attempt timestamps.
    entries: HashMap<IpAddr, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            entries: HashMap::new(),
        }
    }

    /// Login limiter: `max_attempts` per minute per IP address.
    pub fn per_minute(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::from_secs(60))
    }

    /// Check if an attempt is allowed for the given key, and record it if so.
    pub fn check_and_record(&mut self, key: IpAddr) -> bool {
        let now = Instant::now();
        let window = self.window;
        let attempts = self.entries.entry(key).or_default();

        attempts.retain(|t| now.duration_since(*t) < window);

        if attempts.len() as u32 >= self.max_attempts {
            return false;
        }

        attempts.push(now);
        true
    }

    /// Garbage-collect expired entries to prevent memory growth.
    pub fn gc(&mut self) -> usize {
        let now = Instant::now();
        let window = self.window;
        let before = self.entries.len();

        self.entries.retain(|_, attempts| {
            attempts.retain(|t| now.duration_since(*t) < window);
            !attempts.is_empty()
        });

        before - self.entries.len()
    }

    /// Number of tracked keys.
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}
