//! Request rate limiting using a sliding window over per-IP token buckets.
//!
//! Auth endpoints get a tighter budget than the general API since they are
//! the brute-force surface. Limits apply uniformly to all routes within a
//! tier.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::ApiError;
use crate::config::RateLimitConfig;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    /// General API endpoints
    Api,
    /// Login/register/password endpoints
    Auth,
}

#[derive(Debug, Clone)]
struct WindowEntry {
    tokens: u32,
    window_start: Instant,
    last_request: Instant,
}

impl WindowEntry {
    fn new(max_tokens: u32) -> Self {
        let now = Instant::now();
        Self {
            tokens: max_tokens,
            window_start: now,
            last_request: now,
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    entries: DashMap<(IpAddr, RateLimitTier), WindowEntry>,
    config: RateLimitConfig,
    window: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            window: Duration::from_secs(config.window_seconds),
            config,
        }
    }

    fn max_tokens(&self, tier: RateLimitTier) -> u32 {
        match tier {
            RateLimitTier::Api => self.config.api_requests_per_window,
            RateLimitTier::Auth => self.config.auth_requests_per_window,
        }
    }

    /// Consume one token if available. Returns Err(retry_after_seconds)
    /// when the caller is over budget.
    pub fn check(&self, ip: IpAddr, tier: RateLimitTier) -> Result<(), u64> {
        if !self.config.enabled {
            return Ok(());
        }

        let max_tokens = self.max_tokens(tier);
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry((ip, tier))
            .or_insert_with(|| WindowEntry::new(max_tokens));

        let elapsed = now.duration_since(entry.window_start);
        if elapsed >= self.window {
            entry.tokens = max_tokens;
            entry.window_start = now;
        } else {
            // Sliding window: replenish proportionally to time since the
            // last request
            let since_last = now.duration_since(entry.last_request);
            let rate = max_tokens as f64 / self.window.as_secs_f64();
            let replenished = (since_last.as_secs_f64() * rate) as u32;
            entry.tokens = (entry.tokens + replenished).min(max_tokens);
        }
        entry.last_request = now;

        if entry.tokens > 0 {
            entry.tokens -= 1;
            Ok(())
        } else {
            Err(self.window.saturating_sub(elapsed).as_secs().max(1))
        }
    }

    /// Drop entries idle for longer than two windows
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let expiry = self.window * 2;
        self.entries
            .retain(|_, entry| now.duration_since(entry.window_start) < expiry);
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Extract the client IP, honoring reverse-proxy headers
fn extract_client_ip(request: &Request<Body>) -> IpAddr {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(ip_str) = value.split(',').next() {
                if let Ok(ip) = ip_str.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    "127.0.0.1".parse().unwrap()
}

pub async fn rate_limit_api(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    limit_with_tier(state, request, next, RateLimitTier::Api).await
}

pub async fn rate_limit_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    limit_with_tier(state, request, next, RateLimitTier::Auth).await
}

async fn limit_with_tier(
    state: Arc<AppState>,
    request: Request<Body>,
    next: Next,
    tier: RateLimitTier,
) -> Result<Response, ApiError> {
    let ip = extract_client_ip(&request);
    match state.rate_limiter.check(ip, tier) {
        Ok(()) => Ok(next.run(request).await),
        Err(retry_after) => Err(ApiError::new(
            super::error::ErrorCode::TooManyRequests,
            format!("Rate limit exceeded. Try again in {} seconds.", retry_after),
        )),
    }
}

/// Spawn a background task that periodically drops idle limiter entries
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            rate_limiter.cleanup_expired();
            tracing::debug!(
                entries = rate_limiter.entry_count(),
                "Rate limiter cleanup complete"
            );
        }
    });
}
