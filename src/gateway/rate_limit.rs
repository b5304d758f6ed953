//! Per-user fixed-window rate limiting for the chat endpoints.
//!
//! Each user gets `limit` requests per window. The window starts at the
//! user's first request and resets once it has fully elapsed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Idle entries are swept once the table grows past this.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Record one request for `key`. `Err` carries the time until the window resets.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut windows = self.windows.lock();

        if windows.len() > SWEEP_THRESHOLD {
            let window = self.window;
            windows.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        let elapsed = now.duration_since(entry.started);
        if elapsed >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= self.limit {
            return Err(self.window.saturating_sub(elapsed));
        }
        entry.count += 1;
        Ok(())
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::per_minute(3);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at("alice", now).is_ok());
        }
        let retry_after = limiter.check_at("alice", now).unwrap_err();
        assert_eq!(retry_after, Duration::from_secs(60));
    }

    #[test]
    fn users_are_limited_independently() {
        let limiter = RateLimiter::per_minute(1);
        let now = Instant::now();
        assert!(limiter.check_at("alice", now).is_ok());
        assert!(limiter.check_at("bob", now).is_ok());
        assert!(limiter.check_at("alice", now).is_err());
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn window_resets_after_elapsing() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        let start = Instant::now();
        assert!(limiter.check_at("alice", start).is_ok());
        assert!(limiter
            .check_at("alice", start + Duration::from_secs(5))
            .is_err());
        assert!(limiter
            .check_at("alice", start + Duration::from_secs(10))
            .is_ok());
    }
}
