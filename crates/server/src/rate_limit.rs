//! Fixed-window rate limiter for user requests
//!
//! The window lives on the session, so the limiter itself is stateless and
//! shared by every connection.

use parley_agent::Session;
use parley_config::RateLimitConfig;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config }
    }

    /// Count one request against the session's window
    ///
    /// Returns false once the window's allowance is used up. A request
    /// arriving more than a full window after the window opened starts a
    /// new one.
    pub fn check_and_increment(&self, session: &Session) -> bool {
        if !self.config.enabled {
            return true;
        }

        let now = Instant::now();
        let mut window = session.rate_window();

        if now.duration_since(window.start) > self.config.window() {
            window.start = now;
            window.count = 0;
        }

        window.count = window.count.saturating_add(1);
        window.count <= self.config.max_requests
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            enabled: true,
            max_requests,
            window_secs: 60,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_allows_max_then_rejects() {
        let limiter = limiter(3);
        let (session, _rx) = Session::channel(10, 8);

        for _ in 0..3 {
            assert!(limiter.check_and_increment(&session));
        }
        assert!(!limiter.check_and_increment(&session));
        assert!(!limiter.check_and_increment(&session));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets() {
        let limiter = limiter(2);
        let (session, _rx) = Session::channel(10, 8);

        assert!(limiter.check_and_increment(&session));
        assert!(limiter.check_and_increment(&session));
        assert!(!limiter.check_and_increment(&session));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!limiter.check_and_increment(&session));

        // Exactly one window later the old window is still open
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!limiter.check_and_increment(&session));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(limiter.check_and_increment(&session));
        assert_eq!(session.rate_window().count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_are_independent() {
        let limiter = limiter(1);
        let (a, _ra) = Session::channel(10, 8);
        let (b, _rb) = Session::channel(10, 8);

        assert!(limiter.check_and_increment(&a));
        assert!(!limiter.check_and_increment(&a));
        assert!(limiter.check_and_increment(&b));
    }

    #[tokio::test]
    async fn test_disabled() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            max_requests: 1,
            window_secs: 60,
        });
        let (session, _rx) = Session::channel(10, 8);

        for _ in 0..100 {
            assert!(limiter.check_and_increment(&session));
        }
        assert_eq!(session.rate_window().count, 0);
    }
}
