use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

pub const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 100;
pub const DEFAULT_RATE_LIMIT_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter per caller key.
///
/// Each key may make `max_requests` requests per `period`; the window starts
/// on the key's first request and resets once `period` has elapsed.
#[derive(Debug)]
pub struct RequestRateLimiter {
    windows: DashMap<String, Window>,
    max_requests: u32,
    period: Duration,
}

impl RequestRateLimiter {
    pub fn new(max_requests: u32, period: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            period,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Counts one request for `key`. The entry guard makes check-and-count
    /// atomic per key.
    pub fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut window = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= self.period {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.max_requests {
            let retry_after = self.period.saturating_sub(now.duration_since(window.started));
            debug!(key, limit = self.max_requests, ?retry_after, "request rate limited");
            return RateDecision::Limited { retry_after };
        }

        window.count += 1;
        RateDecision::Allowed {
            remaining: self.max_requests - window.count,
        }
    }

    /// Drops windows that have fully elapsed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now.duration_since(window.started) < self.period);
        before.saturating_sub(self.windows.len())
    }

    /// Evicts elapsed windows once per period so idle callers do not
    /// accumulate.
    pub fn start_eviction(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(limiter.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let evicted = limiter.evict_expired();
                if evicted > 0 {
                    debug!(evicted, "rate limit windows evicted");
                }
            }
        })
    }
}

impl Default for RequestRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT_REQUESTS, DEFAULT_RATE_LIMIT_PERIOD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_per_key() {
        let limiter = RequestRateLimiter::new(2, Duration::from_secs(60));

        assert_eq!(limiter.check("acme"), RateDecision::Allowed { remaining: 1 });
        assert_eq!(limiter.check("acme"), RateDecision::Allowed { remaining: 0 });
        assert!(!limiter.check("acme").is_allowed());
        assert!(limiter.check("globex").is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_period() {
        let limiter = RequestRateLimiter::new(1, Duration::from_secs(10));
        assert!(limiter.check("acme").is_allowed());

        tokio::time::advance(Duration::from_secs(4)).await;
        match limiter.check("acme") {
            RateDecision::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(6))
            }
            other => panic!("expected limit, got {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(limiter.check("acme").is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired_drops_idle_keys() {
        let limiter = RequestRateLimiter::new(5, Duration::from_secs(10));
        limiter.check("acme");
        tokio::time::advance(Duration::from_secs(5)).await;
        limiter.check("globex");

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(limiter.evict_expired(), 1);
        assert_eq!(limiter.windows.len(), 1);
        assert!(limiter.windows.contains_key("globex"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_task_clears_idle_keys() {
        let limiter = Arc::new(RequestRateLimiter::new(5, Duration::from_secs(10)));
        limiter.check("acme");
        let task = limiter.start_eviction();

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert!(limiter.windows.is_empty());
        task.abort();
    }
}
