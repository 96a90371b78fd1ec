//! Sliding-window rate limiter for the HTTP boundary.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

pub const DEFAULT_BUCKET: &str = "default";
pub const HIGH_RISK_BUCKET: &str = "high_risk";

#[derive(Debug, Clone, Serialize)]
pub struct RateCheck {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    pub reset_after_s: f64,
}

#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<(String, String), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, key: &str, bucket: &str, limit: usize, window: Duration) -> RateCheck {
        self.check_at(key, bucket, limit, window, Instant::now())
    }

    fn check_at(
        &self,
        key: &str,
        bucket: &str,
        limit: usize,
        window: Duration,
        now: Instant,
    ) -> RateCheck {
        let mut windows = self.windows.lock().expect("rate limiter state");
        let deque = windows
            .entry((bucket.to_string(), key.to_string()))
            .or_default();
        while let Some(front) = deque.front() {
            if now.duration_since(*front) > window {
                deque.pop_front();
            } else {
                break;
            }
        }
        let allowed = deque.len() < limit;
        if allowed {
            deque.push_back(now);
        }
        let remaining = limit.saturating_sub(deque.len());
        let reset_after_s = deque
            .front()
            .map(|front| {
                let elapsed = now.duration_since(*front);
                (window.saturating_sub(elapsed)).as_secs_f64()
            })
            .unwrap_or(0.0);
        RateCheck {
            allowed,
            limit,
            remaining,
            reset_after_s,
        }
    }

    pub fn reset(&self) {
        self.windows.lock().expect("rate limiter state").clear();
    }
}
