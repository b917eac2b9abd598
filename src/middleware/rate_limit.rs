//! Rate limiting middleware.
//!
//! Fixed-window request counting per client address. Each address gets a
//! window that starts with its first request and rolls forward from the
//! first request seen after it expires. Bursts of up to twice the limit are
//! possible across a window boundary; that is a property of fixed windows.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::RETRY_AFTER, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::MessageResponse;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for rate limiting.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum admitted requests per window.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
    /// Use the first `X-Forwarded-For` hop as the client address.
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Admit { remaining: u32 },
    Reject { retry_after: Duration },
}

impl RateDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, RateDecision::Admit { .. })
    }
}

/// Per-address counters in a sharded map; only addresses that hash to the
/// same shard contend with each other.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Arc<DashMap<String, RateWindow>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request from `addr` at `now` and decide whether to admit it.
    pub fn check(&self, addr: &str, now: Instant) -> RateDecision {
        let window = self.config.window;
        let mut entry = self
            .windows
            .entry(addr.to_string())
            .or_insert_with(|| RateWindow {
                count: 0,
                reset_at: now + window,
            });

        if now > entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + window;
        }

        entry.count = entry.count.saturating_add(1);

        if entry.count > self.config.max_requests {
            RateDecision::Reject {
                retry_after: entry.reset_at.saturating_duration_since(now),
            }
        } else {
            RateDecision::Admit {
                remaining: self.config.max_requests - entry.count,
            }
        }
    }

    /// Drop every window that has already expired at `now`. A dropped
    /// address starts a fresh window on its next request, exactly as an
    /// expired one would.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| now <= w.reset_at);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_addresses(&self) -> usize {
        self.windows.len()
    }

    /// Run `sweep` every `interval` until the runtime shuts down. Intervals
    /// below one second are raised to one second.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = limiter.sweep(Instant::now());
                if evicted > 0 {
                    debug!(evicted, "Swept expired rate-limit windows");
                }
            }
        })
    }
}

/// Resolve the address a request is counted against.
pub fn client_address(request: &Request<Body>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        if let Some(addr) = forwarded_for(request.headers()) {
            return addr;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string)
}

/// Rate limiting middleware function.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let addr = client_address(&request, limiter.config.trust_forwarded_for);

    match limiter.check(&addr, Instant::now()) {
        RateDecision::Admit { .. } => next.run(request).await,
        RateDecision::Reject { retry_after } => {
            // Whole seconds, rounded up, never zero.
            let retry_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            let retry_secs = retry_secs.max(1);

            warn!(
                client = %addr,
                retry_after_secs = retry_secs,
                "Rate limit exceeded"
            );

            (
                StatusCode::TOO_MANY_REQUESTS,
                [(RETRY_AFTER, retry_secs.to_string())],
                Json(MessageResponse::new(
                    "Too many requests, please try again later.",
                )),
            )
                .into_response()
        }
    }
}
