use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Default)]
struct Windows {
    clients: HashMap<String, VecDeque<Instant>>,
    last_sweep: Option<Instant>,
}

/// Sliding-window limiter keyed by client address.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    calls: Mutex<Windows>,
}

impl RateLimiter {
    pub fn per_minute(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            calls: Mutex::new(Windows::default()),
        }
    }

    /// Records the call and returns false once `client` is over the limit.
    pub async fn check(&self, client: &str) -> bool {
        self.check_at(client, Instant::now()).await
    }

    async fn check_at(&self, client: &str, now: Instant) -> bool {
        let mut calls = self.calls.lock().await;
        // 客戶端位址可由 X-Forwarded-For 任意指定，每個視窗清掉一次閒置的 key
        let window = self.window;
        match calls.last_sweep {
            Some(last) if now.saturating_duration_since(last) < window => {}
            _ => {
                calls.clients.retain(|_, history| {
                    history
                        .back()
                        .is_some_and(|t| now.saturating_duration_since(*t) < window)
                });
                calls.last_sweep = Some(now);
            }
        }

        let history = calls.clients.entry(client.to_string()).or_default();
        while let Some(oldest) = history.front() {
            if now.saturating_duration_since(*oldest) >= window {
                history.pop_front();
            } else {
                break;
            }
        }
        if history.len() >= self.limit {
            return false;
        }
        history.push_back(now);
        true
    }

    #[cfg(test)]
    async fn tracked_clients(&self) -> usize {
        self.calls.lock().await.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_after_limit_within_window() {
        let limiter = RateLimiter::per_minute(2);
        let start = Instant::now();
        assert!(limiter.check_at("1.2.3.4", start).await);
        assert!(limiter.check_at("1.2.3.4", start).await);
        assert!(!limiter.check_at("1.2.3.4", start + Duration::from_secs(30)).await);
        // 其他客戶端不受影響
        assert!(limiter.check_at("5.6.7.8", start).await);
    }

    #[tokio::test]
    async fn idle_clients_are_forgotten() {
        let limiter = RateLimiter::per_minute(30);
        let start = Instant::now();
        for i in 0..10_000 {
            assert!(limiter.check_at(&format!("10.0.{}.{}", i / 256, i % 256), start).await);
        }
        assert_eq!(limiter.tracked_clients().await, 10_000);

        assert!(limiter.check_at("203.0.113.7", start + Duration::from_secs(3600)).await);
        assert_eq!(limiter.tracked_clients().await, 1);
    }

    #[tokio::test]
    async fn window_slides() {
        let limiter = RateLimiter::per_minute(1);
        let start = Instant::now();
        assert!(limiter.check_at("c", start).await);
        assert!(!limiter.check_at("c", start + Duration::from_secs(59)).await);
        assert!(limiter.check_at("c", start + Duration::from_secs(60)).await);
    }
}
