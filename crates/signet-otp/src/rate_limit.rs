//! Fixed-window rate limiting keyed by purpose and phone number.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

/// Fixed-window counter over a concurrent map.
///
/// Each key gets `limit` hits per `window`; the counter resets when a hit
/// arrives after the window has elapsed. A burst of up to 2x the limit is
/// possible across a window boundary, which is acceptable for an SMS send
/// budget.
pub struct FixedWindowLimiter {
    windows: DashMap<String, Window>,
    limit: u32,
    window: Duration,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window,
        }
    }

    /// Record a hit for `key`; returns whether it is within the limit.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Utc::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock, for tests.
    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });
        if now - entry.started_at >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count <= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = FixedWindowLimiter::new(3, Duration::minutes(10));
        let now = Utc::now();

        for _ in 0..3 {
            assert!(limiter.check_at("send:+14155551234", now));
        }
        assert!(!limiter.check_at("send:+14155551234", now));
        assert!(!limiter.check_at("send:+14155551234", now));
    }

    #[test]
    fn window_resets_after_elapse() {
        let limiter = FixedWindowLimiter::new(2, Duration::minutes(10));
        let start = Utc::now();

        assert!(limiter.check_at("k", start));
        assert!(limiter.check_at("k", start));
        assert!(!limiter.check_at("k", start + Duration::minutes(9)));

        // Past the window the counter starts over
        assert!(limiter.check_at("k", start + Duration::minutes(10)));
        assert!(limiter.check_at("k", start + Duration::minutes(11)));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = FixedWindowLimiter::new(1, Duration::minutes(10));
        let now = Utc::now();

        assert!(limiter.check_at("send:+14155551234", now));
        assert!(!limiter.check_at("send:+14155551234", now));
        assert!(limiter.check_at("send:+442079460958", now));
        assert!(limiter.check_at("check:+14155551234", now));
    }
}
