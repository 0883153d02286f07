//! Rate limiter (C5, §4.5). In-memory, per-key failed-attempt counter with
//! a block window. No eviction policy beyond block expiry (§9 Open
//! Question (b)) — entries live until the process restarts.

use chrono::{DateTime, Duration, Utc};
use cp_core::error::{CoreError, CoreResult};
use dashmap::DashMap;

#[derive(Debug, Clone, Default)]
pub struct RateLimiterConfig {
    pub max_attempts: u32,
    pub block_window: Duration,
}

impl RateLimiterConfig {
    pub fn new(max_attempts: u32, block_window: Duration) -> Self {
        Self {
            max_attempts,
            block_window,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Counter {
    failures: u32,
    blocked_until: Option<DateTime<Utc>>,
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    counters: DashMap<String, Counter>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            counters: DashMap::new(),
        }
    }

    /// Fails with `RateLimited` if `key` is currently blocked.
    pub fn check(&self, key: &str, now: DateTime<Utc>) -> CoreResult<()> {
        if let Some(counter) = self.counters.get(key) {
            if let Some(blocked_until) = counter.blocked_until {
                if blocked_until > now {
                    return Err(CoreError::RateLimited);
                }
            }
        }
        Ok(())
    }

    /// Records a failed attempt, blocking the key once `max_attempts` is
    /// reached. A block that has already expired is cleared first, so a
    /// key gets a fresh run of `max_attempts` rather than re-blocking on
    /// the first failure after expiry.
    pub fn record_failure(&self, key: &str, now: DateTime<Utc>) {
        let mut counter = self.counters.entry(key.to_string()).or_default();
        if let Some(blocked_until) = counter.blocked_until {
            if blocked_until <= now {
                counter.failures = 0;
                counter.blocked_until = None;
            }
        }
        counter.failures += 1;
        if counter.failures >= self.config.max_attempts {
            counter.blocked_until = Some(now + self.config.block_window);
        }
    }

    /// Clears the counter and any block for `key`.
    pub fn reset(&self, key: &str) {
        self.counters.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_max_attempts_then_recovers() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(3, Duration::minutes(1)));
        let t0 = Utc::now();

        for _ in 0..3 {
            assert!(limiter.check("alice", t0).is_ok());
            limiter.record_failure("alice", t0);
        }
        assert_eq!(limiter.check("alice", t0).unwrap_err(), CoreError::RateLimited);

        let later = t0 + Duration::minutes(1) + Duration::seconds(1);
        assert!(limiter.check("alice", later).is_ok());
    }

    #[test]
    fn reset_clears_block() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1, Duration::minutes(1)));
        let now = Utc::now();
        limiter.record_failure("bob", now);
        assert!(limiter.check("bob", now).is_err());
        limiter.reset("bob");
        assert!(limiter.check("bob", now).is_ok());
    }

    #[test]
    fn a_single_failure_after_block_expiry_does_not_immediately_reblock() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(3, Duration::minutes(1)));
        let t0 = Utc::now();

        for _ in 0..3 {
            limiter.record_failure("carol", t0);
        }
        assert_eq!(limiter.check("carol", t0).unwrap_err(), CoreError::RateLimited);

        let after_expiry = t0 + Duration::minutes(1) + Duration::seconds(1);
        assert!(limiter.check("carol", after_expiry).is_ok());

        limiter.record_failure("carol", after_expiry);
        assert!(limiter.check("carol", after_expiry).is_ok());
    }
}
