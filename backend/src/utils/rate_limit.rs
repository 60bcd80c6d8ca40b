use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tracing::warn;

use crate::error::AppError;
use crate::AppState;

const RATELIMIT_LIMIT: &str = "ratelimit-limit";
const RATELIMIT_REMAINING: &str = "ratelimit-remaining";
const RATELIMIT_RESET: &str = "ratelimit-reset";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Time until the oldest counted request leaves the window.
    pub retry_after: Duration,
}

/// Per-key sliding window counter. Timestamps older than the window are
/// dropped lazily on each check; denied attempts are not recorded.
///
/// The state is local to this process: it resets on restart and is not
/// shared between instances.
pub struct SlidingWindowLimiter {
    window: Duration,
    max_requests: usize,
    hits: DashMap<String, Vec<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window,
            max_requests,
            hits: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn decide_at(&self, key: &str, now: Instant) -> RateDecision {
        let window = self.window;
        let mut stamps = self.hits.entry(key.to_string()).or_default();
        stamps.retain(|t| now.saturating_duration_since(*t) < window);

        let retry_after = stamps
            .iter()
            .min()
            .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(window);

        if stamps.len() >= self.max_requests {
            return RateDecision {
                allowed: false,
                limit: self.max_requests,
                remaining: 0,
                retry_after,
            };
        }

        stamps.push(now);
        RateDecision {
            allowed: true,
            limit: self.max_requests,
            remaining: self.max_requests - stamps.len(),
            retry_after,
        }
    }

    /// Drops keys whose timestamps have all left the window.
    pub fn prune(&self, now: Instant) -> usize {
        let window = self.window;
        let before = self.hits.len();
        self.hits.retain(|_, stamps| {
            stamps.retain(|t| now.saturating_duration_since(*t) < window);
            !stamps.is_empty()
        });
        before.saturating_sub(self.hits.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.hits.len()
    }
}

/// Client identity for rate limiting: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the TCP peer, then "unknown".
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn insert_rate_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert(HeaderName::from_static(RATELIMIT_LIMIT), HeaderValue::from(decision.limit));
    headers.insert(HeaderName::from_static(RATELIMIT_REMAINING), HeaderValue::from(decision.remaining));
    headers.insert(
        HeaderName::from_static(RATELIMIT_RESET),
        HeaderValue::from(decision.retry_after.as_secs().max(1)),
    );
}

pub async fn enforce_rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(req.headers(), peer);

    let decision = state.rate_limiter.decide_at(&key, Instant::now());
    if !decision.allowed {
        warn!("Rate limit exceeded for {}", key);
        let mut response = AppError::RateLimited {
            retry_after: decision.retry_after,
            window: state.rate_limiter.window(),
        }
        .into_response();
        insert_rate_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(req).await;
    insert_rate_headers(response.headers_mut(), &decision);
    response
}
