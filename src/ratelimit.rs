//! Sliding-window rate limiter. `check` records the event's
//! arrival timestamp in a per-key sorted set, evicts anything outside the
//! window, and returns the post-eviction count — all inside one atomic
//! script against the cache (`KvCache::sliding_window_count`), so
//! concurrent callers for the same key see a serializable count.

use crate::cache::KvCache;
use crate::config::LimiterProfile;
use std::sync::Arc;

pub enum RateLimitOutcome {
    Allowed { remaining: usize },
    Denied { retry_after_ms: u64 },
}

pub struct RateLimiter {
    cache: Arc<dyn KvCache>,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn KvCache>) -> Self {
        Self { cache }
    }

    pub async fn check(&self, subject_key: &str, profile: LimiterProfile, now_ms: i64) -> Result<RateLimitOutcome, crate::cache::CacheError> {
        let window_secs = (profile.window_ms / 1000).max(1) + 1;
        let count = self
            .cache
            .sliding_window_count(&format!("ratelimit:{subject_key}"), now_ms, profile.window_ms as i64, window_secs)
            .await?;
        if count as usize > profile.max_events {
            Ok(RateLimitOutcome::Denied { retry_after_ms: profile.window_ms })
        } else {
            Ok(RateLimitOutcome::Allowed {
                remaining: profile.max_events.saturating_sub(count as usize),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FakeCache;

    #[tokio::test]
    async fn denies_after_max_events_in_window() {
        let cache: Arc<dyn KvCache> = Arc::new(FakeCache::default());
        let limiter = RateLimiter::new(cache);
        let profile = LimiterProfile { max_events: 2, window_ms: 1000 };
        let a = limiter.check("char:1:move", profile, 0).await.unwrap();
        assert!(matches!(a, RateLimitOutcome::Allowed { .. }));
        let b = limiter.check("char:1:move", profile, 10).await.unwrap();
        assert!(matches!(b, RateLimitOutcome::Allowed { .. }));
        let c = limiter.check("char:1:move", profile, 20).await.unwrap();
        assert!(matches!(c, RateLimitOutcome::Denied { .. }));
    }

    #[tokio::test]
    async fn allows_again_once_window_slides() {
        let cache: Arc<dyn KvCache> = Arc::new(FakeCache::default());
        let limiter = RateLimiter::new(cache);
        let profile = LimiterProfile { max_events: 1, window_ms: 1000 };
        limiter.check("char:2:move", profile, 0).await.unwrap();
        let denied = limiter.check("char:2:move", profile, 500).await.unwrap();
        assert!(matches!(denied, RateLimitOutcome::Denied { .. }));
        let allowed = limiter.check("char:2:move", profile, 1500).await.unwrap();
        assert!(matches!(allowed, RateLimitOutcome::Allowed { .. }));
    }
}
