//! Limiter variants and the decision they produce.
//!
//! Every variant answers `admit(ctx) -> Decision` before the handler runs and
//! `settle(ctx, status)` after it, so outcome-dependent counting (skip
//! successful / skip failed) lives with the variant that needs it.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::config::{LimiterConfig, LimiterKind};
use crate::http::request::ClientContext;
use crate::http::response::{ceil_secs, ApiError};
use crate::observability::events::EventSink;
use crate::security::rate_limit::FixedWindowLimiter;
use crate::security::registry::AccessRegistry;
use crate::security::sliding_window::SlidingWindowLimiter;
use crate::security::slowdown::ProgressiveDelay;
use crate::security::store::CounterStore;

/// Which family of rate-limit headers to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStyle {
    /// `RateLimit-Limit`, `RateLimit-Remaining`, `RateLimit-Reset` (seconds until reset).
    Standard,
    /// `X-RateLimit-Limit`, `X-RateLimit-Remaining`, `X-RateLimit-Reset` (unix seconds).
    Legacy,
}

/// Budget metadata reported to the client whether admitted or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    pub reset_after: Duration,
    pub style: HeaderStyle,
}

impl RateLimitInfo {
    pub fn apply(&self, headers: &mut HeaderMap) {
        let (limit, remaining, reset) = match self.style {
            HeaderStyle::Standard => ("ratelimit-limit", "ratelimit-remaining", "ratelimit-reset"),
            HeaderStyle::Legacy => ("x-ratelimit-limit", "x-ratelimit-remaining", "x-ratelimit-reset"),
        };
        let reset_value = match self.style {
            HeaderStyle::Standard => ceil_secs(self.reset_after),
            HeaderStyle::Legacy => {
                let at = SystemTime::now() + self.reset_after;
                ceil_secs(at.duration_since(UNIX_EPOCH).unwrap_or_default())
            }
        };
        headers.insert(HeaderName::from_static(limit), HeaderValue::from(self.limit));
        headers.insert(HeaderName::from_static(remaining), HeaderValue::from(self.remaining));
        headers.insert(HeaderName::from_static(reset), HeaderValue::from(reset_value));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Address is blocked; answered with 403.
    Blocked,
    /// Budget exhausted; answered with 429.
    RateLimited {
        message: String,
        retry_after: Duration,
        info: RateLimitInfo,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Proceed. Carries budget metadata when the request was counted.
    Allow(Option<RateLimitInfo>),
    /// Proceed after waiting.
    Delay(Duration),
    Reject(Rejection),
}

/// Message for blocked addresses.
pub const BLOCKED_MESSAGE: &str =
    "Your IP has been blocked. Please contact support if you believe this is an error.";

impl Rejection {
    pub fn into_error(self) -> (ApiError, Option<RateLimitInfo>) {
        match self {
            Rejection::Blocked => (ApiError::Forbidden(BLOCKED_MESSAGE.to_string()), None),
            Rejection::RateLimited {
                message,
                retry_after,
                info,
            } => (
                ApiError::TooManyRequests {
                    message,
                    retry_after,
                },
                Some(info),
            ),
        }
    }
}

/// The closed set of limiter flavors.
pub enum Limiter {
    Fixed(FixedWindowLimiter),
    Sliding(SlidingWindowLimiter),
    Delay(ProgressiveDelay),
}

impl Limiter {
    pub fn name(&self) -> &str {
        match self {
            Limiter::Fixed(l) => l.name(),
            Limiter::Sliding(l) => l.name(),
            Limiter::Delay(_) => "slowdown",
        }
    }

    pub async fn admit(&self, ctx: &ClientContext) -> Decision {
        match self {
            Limiter::Fixed(l) => l.admit(ctx).await,
            Limiter::Sliding(l) => l.admit(ctx),
            Limiter::Delay(l) => l.admit(ctx).await,
        }
    }

    /// Report the final status of an admitted request.
    pub async fn settle(&self, ctx: &ClientContext, status: StatusCode) {
        match self {
            Limiter::Fixed(l) => l.settle(ctx, status).await,
            Limiter::Sliding(_) => {}
            Limiter::Delay(l) => l.settle(ctx, status).await,
        }
    }
}

/// A limiter bound to a set of path prefixes.
pub struct RouteLimiter {
    paths: Vec<String>,
    pub limiter: Limiter,
}

impl RouteLimiter {
    pub fn new(paths: Vec<String>, limiter: Limiter) -> Self {
        Self { paths, limiter }
    }

    /// Build from configuration. Fixed limiters share `store`.
    pub fn from_config(
        config: &LimiterConfig,
        store: Arc<dyn CounterStore>,
        registry: Arc<AccessRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let limiter = match config.kind {
            LimiterKind::Fixed => {
                Limiter::Fixed(FixedWindowLimiter::new(config, store, registry, events))
            }
            LimiterKind::Sliding => {
                Limiter::Sliding(SlidingWindowLimiter::new(config, registry, events))
            }
        };
        Self::new(config.paths.clone(), limiter)
    }

    pub fn matches(&self, path: &str) -> bool {
        self.paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}
