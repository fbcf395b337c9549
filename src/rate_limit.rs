//! Sliding-window rate limiting per client.
//!
//! Each client owns a queue of request instants. Instants older than the
//! window are dropped before every check, and a request is recorded only
//! when it is admitted. Windows of idle clients are evicted by the cache.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use moka::future::Cache;

use crate::config::RateLimitConfig;

const FORWARDED_FOR: &str = "x-forwarded-for";

type Window = Arc<Mutex<VecDeque<Instant>>>;

#[derive(Clone)]
pub struct RateLimiter {
    windows: Cache<String, Window>,
    max_requests: usize,
    period: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, period: Duration) -> Self {
        Self {
            windows: Cache::builder().time_to_idle(period).build(),
            max_requests,
            period,
        }
    }

    /// `None` when rate limiting is disabled
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.requests, Duration::from_secs(config.period_seconds)))
    }

    /// Admit one request from `client`, or return how long until a slot frees up
    pub async fn check(&self, client: &str) -> Result<(), Duration> {
        let window = self
            .windows
            .get_with(client.to_string(), async { Arc::new(Mutex::new(VecDeque::new())) })
            .await;
        let mut window = window.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let now = Instant::now();
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.period {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.max_requests {
            let retry_after = window
                .front()
                .map(|oldest| self.period.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.period);
            return Err(retry_after);
        }

        window.push_back(now);
        Ok(())
    }
}

/// Client identity: first `X-Forwarded-For` hop, else the peer address
pub fn client_id(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match (forwarded, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

/// Whole seconds for a `Retry-After` header, never zero
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}
