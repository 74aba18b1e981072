use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::shared::config::RateLimitConfig;

/// Fixed-window request counter per client.
///
/// The whole table is cleared when the window elapses rather than per
/// client, so a client may burst up to twice the limit across a reset.
pub struct RateLimiter {
    inner: Mutex<RateLimiterInner>,
}

struct RateLimiterInner {
    max_per_window: u32,
    window: Duration,
    window_start: Instant,
    counts: HashMap<String, u32>,
}

impl RateLimiterInner {
    fn reset_if_elapsed(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.window_start) < self.window {
            return false;
        }
        self.counts.clear();
        self.window_start = now;
        true
    }
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    fn starting_at(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            inner: Mutex::new(RateLimiterInner {
                max_per_window: config.max_per_window,
                window: config.window,
                window_start: now,
                counts: HashMap::new(),
            }),
        }
    }

    /// Count a request from `client`. Returns false once the client has
    /// made more than the allowed number of requests this window.
    pub fn admit(&self, client: &str) -> bool {
        self.admit_at(client, Instant::now())
    }

    pub fn admit_at(&self, client: &str, now: Instant) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.reset_if_elapsed(now);
        let limit = inner.max_per_window;
        let count = inner.counts.entry(client.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count <= limit
    }

    /// Clear all counters if the window has elapsed. Returns whether a
    /// reset happened.
    pub fn reset_if_elapsed(&self) -> bool {
        self.reset_if_elapsed_at(Instant::now())
    }

    pub fn reset_if_elapsed_at(&self, now: Instant) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset_if_elapsed(now)
    }

    /// Number of clients seen in the current window.
    pub fn tracked_clients(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counts
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, start: Instant) -> RateLimiter {
        RateLimiter::starting_at(
            &RateLimitConfig {
                max_per_window: max,
                window: Duration::from_secs(60),
            },
            start,
        )
    }

    #[test]
    fn test_admits_up_to_limit_then_rejects() {
        let t0 = Instant::now();
        let rl = limiter(3, t0);
        assert!(rl.admit_at("a", t0));
        assert!(rl.admit_at("a", t0));
        assert!(rl.admit_at("a", t0));
        assert!(!rl.admit_at("a", t0));
        assert!(!rl.admit_at("a", t0));
    }

    #[test]
    fn test_clients_are_counted_separately() {
        let t0 = Instant::now();
        let rl = limiter(1, t0);
        assert!(rl.admit_at("a", t0));
        assert!(!rl.admit_at("a", t0));
        assert!(rl.admit_at("b", t0));
        assert_eq!(rl.tracked_clients(), 2);
    }

    #[test]
    fn test_admits_again_after_window_reset() {
        let t0 = Instant::now();
        let rl = limiter(1, t0);
        assert!(rl.admit_at("a", t0));
        assert!(!rl.admit_at("a", t0 + Duration::from_secs(59)));
        assert!(rl.admit_at("a", t0 + Duration::from_secs(60)));
    }

    #[test]
    fn test_reset_is_global() {
        let t0 = Instant::now();
        let rl = limiter(5, t0);
        rl.admit_at("a", t0);
        rl.admit_at("b", t0);

        assert!(!rl.reset_if_elapsed_at(t0 + Duration::from_secs(30)));
        assert_eq!(rl.tracked_clients(), 2);
        assert!(rl.reset_if_elapsed_at(t0 + Duration::from_secs(61)));
        assert_eq!(rl.tracked_clients(), 0);
    }

    #[test]
    fn test_burst_across_reset_boundary() {
        let t0 = Instant::now();
        let rl = limiter(2, t0);
        let late = t0 + Duration::from_secs(59);
        let early = t0 + Duration::from_secs(60);
        let admitted = [late, late, early, early]
            .iter()
            .filter(|&&t| rl.admit_at("a", t))
            .count();
        assert_eq!(admitted, 4);
    }
}
