//! Fixed-window rate limiting keyed by scanning actor.
//!
//! The counter store sits behind a trait so a shared backend (e.g.
//! Redis) can replace the in-process map without touching the engines.
//! The limiter is consulted synchronously before the award transaction
//! and carries no transactional consistency with the ledger.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{CoreError, Result};

/// Keyed counter store with fixed windows.
#[async_trait]
pub trait RateCounter: Send + Sync {
    /// Record a hit for `key` and return the total hits in the window
    /// containing `now`.
    async fn hit(&self, key: &str, window_secs: i64, now: DateTime<Utc>) -> u64;
}

/// In-process counter store.
///
/// Loses state across restarts; the trait is the seam for substituting
/// a shared store when running more than one instance.
#[derive(Default)]
pub struct InMemoryCounter {
    windows: Mutex<HashMap<String, (i64, u64)>>,
}

impl InMemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateCounter for InMemoryCounter {
    async fn hit(&self, key: &str, window_secs: i64, now: DateTime<Utc>) -> u64 {
        let window_start = now.timestamp().div_euclid(window_secs) * window_secs;
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let entry = windows.entry(key.to_string()).or_insert((window_start, 0));
        if entry.0 != window_start {
            *entry = (window_start, 0);
        }
        entry.1 += 1;
        entry.1
    }
}

/// Per-actor request budget over a fixed window.
pub struct RateLimiter {
    counter: Arc<dyn RateCounter>,
    max_hits: u64,
    window_secs: i64,
}

impl RateLimiter {
    pub fn new(counter: Arc<dyn RateCounter>, max_hits: u64, window_secs: i64) -> Self {
        Self {
            counter,
            max_hits,
            window_secs,
        }
    }

    /// Record a hit for the actor and fail once the budget is exceeded.
    pub async fn check(&self, actor: &str, now: DateTime<Utc>) -> Result<()> {
        let hits = self.counter.hit(actor, self.window_secs, now).await;
        if hits > self.max_hits {
            debug!(actor = %actor, hits, max = self.max_hits, "rate limit exceeded");
            return Err(CoreError::RateLimited {
                actor: actor.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn limiter(max_hits: u64) -> RateLimiter {
        RateLimiter::new(Arc::new(InMemoryCounter::new()), max_hits, 60)
    }

    #[tokio::test]
    async fn test_allows_up_to_budget() {
        let limiter = limiter(3);
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();
        for _ in 0..3 {
            limiter.check("scanner-1", now).await.unwrap();
        }
        let err = limiter.check("scanner-1", now).await.unwrap_err();
        assert_eq!(err.code(), "RATE_LIMITED");
    }

    #[tokio::test]
    async fn test_new_window_resets_budget() {
        let limiter = limiter(1);
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 30).unwrap();
        limiter.check("scanner-1", now).await.unwrap();
        assert!(limiter.check("scanner-1", now).await.is_err());

        let next_window = Utc.with_ymd_and_hms(2026, 8, 7, 12, 1, 0).unwrap();
        limiter.check("scanner-1", next_window).await.unwrap();
    }

    #[tokio::test]
    async fn test_actors_are_isolated() {
        let limiter = limiter(1);
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();
        limiter.check("scanner-1", now).await.unwrap();
        limiter.check("scanner-2", now).await.unwrap();
        assert!(limiter.check("scanner-1", now).await.is_err());
    }
}
