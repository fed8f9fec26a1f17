//! Fixed-window request limiter keyed by client IP.
//!
//! Counters live in process memory only. The first request from an address
//! opens a window; once `max_requests` have been admitted, further requests
//! are rejected until the window elapses.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::error::ErrorBody;

pub const RATE_LIMITED_MESSAGE: &str = "Too many requests, please try again later.";

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

pub struct FixedWindowLimiter {
    window: Duration,
    max_requests: u32,
    counters: DashMap<IpAddr, Window, ahash::RandomState>,
}

impl FixedWindowLimiter {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self {
            window: Duration::from_secs(cfg.window_secs),
            max_requests: cfg.max_requests,
            counters: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check(&self, key: IpAddr) -> Decision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: IpAddr, now: Instant) -> Decision {
        let mut entry = self.counters.entry(key).or_insert(Window {
            started: now,
            count: 0,
        });
        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count >= self.max_requests {
            let retry_after = self.window.saturating_sub(now.saturating_duration_since(entry.started));
            return Decision::Limited { retry_after };
        }
        entry.count += 1;
        Decision::Allowed {
            remaining: self.max_requests - entry.count,
        }
    }

    /// Drop windows that have fully elapsed. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let before = self.counters.len();
        self.counters
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        before.saturating_sub(self.counters.len())
    }

    pub fn tracked_addresses(&self) -> usize {
        self.counters.len()
    }
}

/// Periodically sweep expired windows so idle addresses do not accumulate.
pub fn spawn_sweeper(limiter: Arc<FixedWindowLimiter>) -> tokio::task::JoinHandle<()> {
    let period = limiter.window().max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.sweep();
            if removed > 0 {
                tracing::debug!(removed, remaining = limiter.tracked_addresses(), "rate limiter sweep");
            }
        }
    })
}

/// Requests served without connect info (e.g. in-process tests) share one bucket.
fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn enforce_rate_limit(
    State(limiter): State<Arc<FixedWindowLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    match limiter.check(ip) {
        Decision::Allowed { remaining } => {
            let mut resp = next.run(req).await;
            let headers = resp.headers_mut();
            headers.insert("ratelimit-limit", HeaderValue::from(limiter.max_requests()));
            headers.insert("ratelimit-remaining", HeaderValue::from(remaining));
            resp
        }
        Decision::Limited { retry_after } => {
            tracing::warn!(client = %ip, "rate limit exceeded");
            let secs = retry_after.as_secs().max(1);
            let mut resp = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorBody::message(RATE_LIMITED_MESSAGE)),
            )
                .into_response();
            resp.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, HeaderValue::from(secs));
            resp
        }
    }
}
