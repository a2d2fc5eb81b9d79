// src/ratelimit.rs

//! Per-caller sliding-window throttle for the session listing.
//!
//! The key is whatever the boundary layer uses to identify a caller
//! (typically its network address). That is not a reliable identity behind
//! proxies or NAT, so treat this as load shedding for aggressive polling,
//! not as an access control.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::RateLimitSettings;
use crate::errors::{OrchestratorError, Result};

#[derive(Debug)]
pub struct RateLimiter {
    settings: RateLimitSettings,
    /// Caller key -> timestamps of accepted requests inside the window.
    requests: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            requests: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Check and record one request for `key`.
    pub fn acquire(&self, key: &str) -> Result<()> {
        self.acquire_at(key, Instant::now())
    }

    /// [`acquire`](Self::acquire) against an explicit clock reading.
    pub fn acquire_at(&self, key: &str, now: Instant) -> Result<()> {
        if !self.settings.enabled {
            return Ok(());
        }

        let window = self.settings.window;
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let records = requests.entry(key.to_string()).or_default();

        while records
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            records.pop_front();
        }

        if records.len() < self.settings.max_requests as usize {
            records.push_back(now);
            return Ok(());
        }

        // Full window: the caller may retry once the oldest request ages out.
        let oldest = records.front().copied().unwrap_or(now);
        let retry_after = window
            .saturating_sub(now.saturating_duration_since(oldest))
            .max(Duration::from_millis(1));

        debug!(
            caller = %key,
            retry_after_ms = retry_after.as_millis() as u64,
            "listing request rate limited"
        );
        Err(OrchestratorError::RateLimited { retry_after })
    }

    /// Drop callers with no request inside the window. Returns how many keys
    /// were removed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    pub fn cleanup_at(&self, now: Instant) -> usize {
        let window = self.settings.window;
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let before = requests.len();

        requests.retain(|_, records| {
            records.retain(|t| now.saturating_duration_since(*t) < window);
            !records.is_empty()
        });

        before - requests.len()
    }

    /// Number of callers currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitSettings {
            enabled: true,
            window: Duration::from_secs(window_secs),
            max_requests: max,
        })
    }

    #[test]
    fn sixth_request_in_window_is_rejected_with_retry_after() {
        let rl = limiter(5, 10);
        let start = Instant::now();

        for i in 0..5 {
            rl.acquire_at("10.0.0.1", start + Duration::from_secs(i)).unwrap();
        }

        let err = rl
            .acquire_at("10.0.0.1", start + Duration::from_secs(6))
            .unwrap_err();
        match err {
            OrchestratorError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(4));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn window_slides_as_old_requests_expire() {
        let rl = limiter(2, 10);
        let start = Instant::now();

        rl.acquire_at("a", start).unwrap();
        rl.acquire_at("a", start + Duration::from_secs(5)).unwrap();
        assert!(rl.acquire_at("a", start + Duration::from_secs(9)).is_err());

        // The first request leaves the window at t=10.
        rl.acquire_at("a", start + Duration::from_secs(10)).unwrap();
        assert!(rl.acquire_at("a", start + Duration::from_secs(11)).is_err());
    }

    #[test]
    fn callers_are_limited_independently() {
        let rl = limiter(1, 10);
        let now = Instant::now();

        rl.acquire_at("a", now).unwrap();
        assert!(rl.acquire_at("a", now).is_err());
        rl.acquire_at("b", now).unwrap();
    }

    #[test]
    fn rejected_requests_do_not_extend_the_window() {
        let rl = limiter(1, 10);
        let start = Instant::now();

        rl.acquire_at("a", start).unwrap();
        for s in 1..10 {
            assert!(rl.acquire_at("a", start + Duration::from_secs(s)).is_err());
        }
        rl.acquire_at("a", start + Duration::from_secs(10)).unwrap();
    }

    #[test]
    fn disabled_limiter_admits_everything() {
        let rl = RateLimiter::new(RateLimitSettings {
            enabled: false,
            window: Duration::from_secs(10),
            max_requests: 1,
        });
        let now = Instant::now();
        for _ in 0..20 {
            rl.acquire_at("a", now).unwrap();
        }
        assert_eq!(rl.tracked_keys(), 0);
    }

    #[test]
    fn cleanup_drops_idle_callers() {
        let rl = limiter(5, 10);
        let start = Instant::now();
        rl.acquire_at("idle", start).unwrap();
        rl.acquire_at("busy", start + Duration::from_secs(8)).unwrap();

        assert_eq!(rl.cleanup_at(start + Duration::from_secs(12)), 1);
        assert_eq!(rl.tracked_keys(), 1);
    }
}
