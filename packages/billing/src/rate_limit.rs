//! Per-tenant sliding-window admission limit.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::TenantId;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub window: Duration,
    pub max: u32,
}

/// Allows at most `max` admissions per tenant within any `window`.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: RateLimit,
    hits: Mutex<HashMap<TenantId, VecDeque<DateTime<Utc>>>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Record an admission for `tenant` at `at` if the window has room.
    ///
    /// On refusal returns how long until the oldest admission leaves the window.
    pub async fn try_acquire(&self, tenant: &TenantId, at: DateTime<Utc>) -> Result<(), Duration> {
        let window =
            chrono::Duration::from_std(self.limit.window).unwrap_or(chrono::Duration::weeks(52));
        let mut hits = self.hits.lock().await;
        let recent = hits.entry(tenant.clone()).or_default();

        while recent.front().is_some_and(|first| *first + window <= at) {
            recent.pop_front();
        }

        if recent.len() < self.limit.max as usize {
            recent.push_back(at);
            return Ok(());
        }

        let retry_after = recent
            .front()
            .map(|first| (*first + window - at).to_std().unwrap_or_default())
            .unwrap_or_default();
        Err(retry_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_secs: u64) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(RateLimit {
            window: Duration::from_secs(window_secs),
            max,
        })
    }

    #[tokio::test]
    async fn refuses_once_window_is_full() {
        let limiter = limiter(2, 60);
        let tenant = TenantId::new("tenant-a");
        let t0 = Utc::now();

        assert!(limiter.try_acquire(&tenant, t0).await.is_ok());
        assert!(limiter.try_acquire(&tenant, t0 + chrono::Duration::seconds(10)).await.is_ok());
        let retry_after = limiter
            .try_acquire(&tenant, t0 + chrono::Duration::seconds(20))
            .await
            .unwrap_err();
        assert_eq!(retry_after, Duration::from_secs(40));
    }

    #[tokio::test]
    async fn window_slides() {
        let limiter = limiter(1, 60);
        let tenant = TenantId::new("tenant-a");
        let t0 = Utc::now();

        assert!(limiter.try_acquire(&tenant, t0).await.is_ok());
        assert!(limiter.try_acquire(&tenant, t0 + chrono::Duration::seconds(59)).await.is_err());
        assert!(limiter.try_acquire(&tenant, t0 + chrono::Duration::seconds(60)).await.is_ok());
    }

    #[tokio::test]
    async fn tenants_are_limited_independently() {
        let limiter = limiter(1, 60);
        let t0 = Utc::now();

        assert!(limiter.try_acquire(&TenantId::new("a"), t0).await.is_ok());
        assert!(limiter.try_acquire(&TenantId::new("b"), t0).await.is_ok());
        assert!(limiter.try_acquire(&TenantId::new("a"), t0).await.is_err());
    }
}
