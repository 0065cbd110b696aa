use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::lifecycle::{REPORTS_PER_HOUR, REPORT_WINDOW_SECS};

/// Sliding window in-memory rate limiter (pod local). Under multi-replica
/// deployments concurrent bursts can overshoot the quota slightly; the
/// engine accepts that trade-off rather than a transactional count.
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            enabled,
        }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled {
            return true;
        }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub report_limit: usize,
    pub report_window: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
        fn dur_env(name: &str, default: u64) -> Duration {
            Duration::from_secs(
                std::env::var(name)
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default),
            )
        }
        Self {
            report_limit: usize_env("RL_REPORT_LIMIT", REPORTS_PER_HOUR),
            report_window: dur_env("RL_REPORT_WINDOW", REPORT_WINDOW_SECS),
        }
    }
}

/// High level guard used by handlers, keyed per user.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self {
        Self { limiter, cfg }
    }

    pub fn allow_report(&self, user_id: &str) -> bool {
        self.limiter.check(
            &format!("report:{user_id}"),
            self.cfg.report_limit,
            self.cfg.report_window,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_window_basic() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_millis(50);
        for _ in 0..3 {
            assert!(rl.check("k", 3, window));
        }
        assert!(!rl.check("k", 3, window));
    }

    #[test]
    fn tenth_report_allowed_eleventh_denied() {
        let facade = RateLimiterFacade::new(
            InMemoryRateLimiter::new(true),
            RateLimitConfig {
                report_limit: REPORTS_PER_HOUR,
                report_window: Duration::from_secs(REPORT_WINDOW_SECS),
            },
        );
        for _ in 0..REPORTS_PER_HOUR {
            assert!(facade.allow_report("u1"));
        }
        assert!(!facade.allow_report("u1"));
        // a different user is unaffected
        assert!(facade.allow_report("u2"));
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let rl = InMemoryRateLimiter::new(false);
        for _ in 0..100 {
            assert!(rl.check("k", 1, Duration::from_secs(60)));
        }
    }
}
