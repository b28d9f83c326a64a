//! Per-user request throttling for LLM-backed endpoints

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::ApiError;

/// Keyed limiter: `quota` requests per minute per user, burst = quota
///
/// A quota of 0 disables limiting.
#[derive(Clone)]
pub struct UserRateLimiter {
    limiter: Option<Arc<DefaultKeyedRateLimiter<String>>>,
    clock: DefaultClock,
}

impl UserRateLimiter {
    pub fn per_minute(quota: u32) -> Self {
        let limiter = NonZeroU32::new(quota).map(|per_minute| {
            info!("Rate limiting LLM endpoints to {} requests/minute per user", per_minute);
            Arc::new(RateLimiter::keyed(
                Quota::per_minute(per_minute).allow_burst(per_minute),
            ))
        });

        Self {
            limiter,
            clock: DefaultClock::default(),
        }
    }

    pub fn disabled() -> Self {
        Self::per_minute(0)
    }

    /// Consume one request for `user_id`
    ///
    /// Over quota → `TooManyRequests` with whole seconds to wait (at least 1).
    pub fn check(&self, user_id: &str) -> Result<(), ApiError> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        match limiter.check_key(&user_id.to_string()) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                let retry_after_secs = (wait.as_secs_f64().ceil() as u64).max(1);
                debug!(user_id, retry_after_secs, "Rate limit exceeded");
                Err(ApiError::TooManyRequests { retry_after_secs })
            }
        }
    }

    /// Drop state for keys whose quota has fully replenished
    pub fn shrink(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_quota_then_rejects() {
        let limiter = UserRateLimiter::per_minute(3);
        for _ in 0..3 {
            assert!(limiter.check("u1").is_ok());
        }
        match limiter.check("u1") {
            Err(ApiError::TooManyRequests { retry_after_secs }) => {
                assert!(retry_after_secs >= 1);
                assert!(retry_after_secs <= 60);
            }
            other => panic!("expected TooManyRequests, got {:?}", other),
        }
    }

    #[test]
    fn test_users_are_independent() {
        let limiter = UserRateLimiter::per_minute(1);
        assert!(limiter.check("u1").is_ok());
        assert!(limiter.check("u1").is_err());
        assert!(limiter.check("u2").is_ok());
    }

    #[test]
    fn test_zero_quota_disables() {
        let limiter = UserRateLimiter::disabled();
        for _ in 0..100 {
            assert!(limiter.check("u1").is_ok());
        }
    }
}
