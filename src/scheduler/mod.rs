use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::DEFAULT_POLLING_INTERVAL;

/// The single failure rate limiter shared by every controller's error
/// policy. Exponential from 5 ms to 60 s with full jitter, keyed by
/// `namespace/name` so one flapping resource cannot starve the rest.
pub struct RateLimiter {
    base: Duration,
    cap: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimiter::new(Duration::from_millis(5), Duration::from_secs(60))
    }
}

impl RateLimiter {
    pub fn new(base: Duration, cap: Duration) -> Self {
        RateLimiter {
            base,
            cap,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure for `key` and return how long to wait before the
    /// next attempt.
    pub fn when(&self, key: &str) -> Duration {
        let attempt = {
            let mut failures = match self.failures.lock() {
                Ok(f) => f,
                Err(poisoned) => poisoned.into_inner(),
            };
            let entry = failures.entry(key.to_string()).or_insert(0);
            let attempt = *entry;
            *entry = entry.saturating_add(1);
            attempt
        };

        let backoff = self.delay_for_attempt(attempt);
        // Full jitter keeps simultaneous failures from requeueing in step.
        let jittered = rand::thread_rng().gen_range(0.0..=1.0) * backoff.as_secs_f64();
        Duration::from_secs_f64(jittered.max(self.base.as_secs_f64()))
    }

    /// The undithered delay for the nth consecutive failure.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.min(63);
        let delay = self.base.as_secs_f64() * 2f64.powi(exp as i32);
        let capped = delay.min(self.cap.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Clear the failure count after a success.
    pub fn forget(&self, key: &str) {
        let mut failures = match self.failures.lock() {
            Ok(f) => f,
            Err(poisoned) => poisoned.into_inner(),
        };
        failures.remove(key);
    }
}

/// Effective git polling interval: the user's interval clamped by the system
/// default floor. A zero or unparsable interval falls back to the default.
pub fn effective_polling_interval(user_interval: Option<&str>) -> Duration {
    let configured = user_interval
        .and_then(|i| crate::config::parse_duration(i).ok())
        .filter(|d| !d.is_zero());

    match configured {
        Some(d) => d.min(DEFAULT_POLLING_INTERVAL).max(Duration::from_secs(1)),
        None => DEFAULT_POLLING_INTERVAL,
    }
}

/// Time left until a registration token created at `created` with the given
/// TTL expires; `None` when it never does.
pub fn token_time_to_expiry(
    created: DateTime<Utc>,
    ttl_seconds: Option<i64>,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let ttl = ttl_seconds.filter(|t| *t > 0)?;
    let expires = created + chrono::Duration::seconds(ttl);
    Some((expires - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.delay_for_attempt(0), Duration::from_millis(5));
        assert_eq!(limiter.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(limiter.delay_for_attempt(4), Duration::from_millis(80));
        assert_eq!(limiter.delay_for_attempt(30), Duration::from_secs(60));
    }

    #[test]
    fn failures_accumulate_per_key_and_reset() {
        let limiter = RateLimiter::default();
        for _ in 0..10 {
            limiter.when("fleet-default/repo-a");
        }
        // An unrelated key still starts from the base.
        let fresh = limiter.when("fleet-default/repo-b");
        assert!(fresh <= Duration::from_millis(10));

        limiter.forget("fleet-default/repo-a");
        let reset = limiter.when("fleet-default/repo-a");
        assert!(reset <= Duration::from_millis(10));
    }

    #[test]
    fn polling_interval_is_clamped_by_the_system_default() {
        assert_eq!(
            effective_polling_interval(Some("5s")),
            Duration::from_secs(5)
        );
        assert_eq!(
            effective_polling_interval(Some("10m")),
            DEFAULT_POLLING_INTERVAL
        );
        assert_eq!(effective_polling_interval(None), DEFAULT_POLLING_INTERVAL);
        assert_eq!(
            effective_polling_interval(Some("bogus")),
            DEFAULT_POLLING_INTERVAL
        );
    }

    #[test]
    fn token_expiry_math() {
        let created = Utc::now();
        let now = created + chrono::Duration::seconds(30);
        let left = token_time_to_expiry(created, Some(60), now).expect("expiry");
        assert!(left <= Duration::from_secs(30));
        assert!(token_time_to_expiry(created, None, now).is_none());
        assert!(token_time_to_expiry(created, Some(0), now).is_none());
        assert_eq!(
            token_time_to_expiry(created, Some(10), now),
            Some(Duration::ZERO)
        );
    }
}
