//! Fixed-window rate limiting over a pluggable counter store.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use crate::config::LimiterConfig;
use crate::http::request::ClientContext;
use crate::observability::events::{EventKind, EventSink, SecurityEvent, Severity};
use crate::observability::metrics;
use crate::security::key::{default_key_fn, KeyFn};
use crate::security::limiter::{Decision, HeaderStyle, RateLimitInfo, Rejection};
use crate::security::registry::AccessRegistry;
use crate::security::store::CounterStore;

/// Counts requests per key in discrete windows and rejects past `max`.
pub struct FixedWindowLimiter {
    name: String,
    window: Duration,
    max: u64,
    message: String,
    skip_successful: bool,
    skip_failed: bool,
    store: Arc<dyn CounterStore>,
    registry: Arc<AccessRegistry>,
    events: Arc<dyn EventSink>,
    key_fn: KeyFn,
}

impl FixedWindowLimiter {
    pub fn new(
        config: &LimiterConfig,
        store: Arc<dyn CounterStore>,
        registry: Arc<AccessRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            window: Duration::from_millis(config.window_ms),
            max: config.max,
            message: config.message.clone(),
            skip_successful: config.skip_successful,
            skip_failed: config.skip_failed,
            store,
            registry,
            events,
            key_fn: default_key_fn(),
        }
    }

    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = key_fn;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn store_key(&self, ctx: &ClientContext) -> String {
        format!("rl:{}:{}", self.name, (self.key_fn)(ctx))
    }

    pub async fn admit(&self, ctx: &ClientContext) -> Decision {
        if self.registry.is_exempt(ctx) {
            return Decision::Allow(None);
        }
        if self.registry.is_blocked(ctx.addr) {
            return Decision::Reject(Rejection::Blocked);
        }

        let key = self.store_key(ctx);
        let counted = match self.store.increment(&key, self.window).await {
            Ok(counted) => counted,
            Err(err) => {
                tracing::error!(limiter = %self.name, error = %err, "Counter store failed, admitting request");
                return Decision::Allow(None);
            }
        };

        let info = RateLimitInfo {
            limit: self.max,
            remaining: self.max.saturating_sub(counted.count),
            reset_after: counted.reset_after,
            style: HeaderStyle::Standard,
        };
        if counted.count <= self.max {
            return Decision::Allow(Some(info));
        }

        self.events.record(
            SecurityEvent::new(EventKind::RateLimitExceeded, Severity::Medium)
                .with_request(ctx)
                .with_details(serde_json::json!({
                    "limiter": self.name,
                    "limit": self.max,
                    "count": counted.count,
                })),
        );
        metrics::record_rate_limited(&self.name);
        self.registry.record_violation(ctx.addr);

        Decision::Reject(Rejection::RateLimited {
            message: self.message.clone(),
            retry_after: counted.reset_after,
            info,
        })
    }

    /// Uncount the request when its outcome is one this limiter skips.
    pub async fn settle(&self, ctx: &ClientContext, status: StatusCode) {
        let failed = status.is_client_error() || status.is_server_error();
        let skip = (self.skip_successful && !failed) || (self.skip_failed && failed);
        if !skip || self.registry.is_exempt(ctx) {
            return;
        }
        if let Err(err) = self.store.decrement(&self.store_key(ctx)).await {
            tracing::error!(limiter = %self.name, error = %err, "Failed to uncount request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimiterKind, SecurityConfig};
    use crate::observability::SecurityEventLog;
    use crate::security::store::MemoryStore;
    use std::net::IpAddr;

    struct Fixture {
        limiter: FixedWindowLimiter,
        registry: Arc<AccessRegistry>,
        log: Arc<SecurityEventLog>,
    }

    fn fixture(max: u64, window_secs: u64, skip_successful: bool) -> Fixture {
        let log = Arc::new(SecurityEventLog::default());
        let registry = Arc::new(AccessRegistry::from_config(
            &SecurityConfig {
                allowlist: vec!["10.1.1.1".into()],
                ..SecurityConfig::default()
            },
            log.clone(),
        ));
        let config = LimiterConfig {
            name: "contact".into(),
            kind: LimiterKind::Fixed,
            window_ms: window_secs * 1000,
            max,
            message: "Too many submissions".into(),
            skip_successful,
            skip_failed: false,
            paths: vec!["/api/contact".into()],
        };
        let limiter =
            FixedWindowLimiter::new(&config, Arc::new(MemoryStore::new()), registry.clone(), log.clone());
        Fixture {
            limiter,
            registry,
            log,
        }
    }

    fn ctx(addr: &str, path: &str) -> ClientContext {
        ClientContext::anonymous(addr.parse::<IpAddr>().unwrap(), path)
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_max_then_rejects_with_retry_after() {
        let f = fixture(5, 900, false);
        let c = ctx("203.0.113.1", "/api/contact");

        for i in 0..5 {
            match f.limiter.admit(&c).await {
                Decision::Allow(Some(info)) => assert_eq!(info.remaining, 4 - i),
                other => panic!("request {i} not admitted: {other:?}"),
            }
        }

        tokio::time::advance(Duration::from_secs(100)).await;
        match f.limiter.admit(&c).await {
            Decision::Reject(Rejection::RateLimited { retry_after, info, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(800));
                assert_eq!(info.remaining, 0);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(f.log.count(EventKind::RateLimitExceeded), 1);
        assert_eq!(f.registry.violations(c.addr), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_window_admits_again() {
        let f = fixture(1, 60, false);
        let c = ctx("203.0.113.2", "/api/contact");
        assert!(matches!(f.limiter.admit(&c).await, Decision::Allow(Some(_))));
        assert!(matches!(f.limiter.admit(&c).await, Decision::Reject(_)));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(matches!(f.limiter.admit(&c).await, Decision::Allow(Some(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_isolated() {
        let f = fixture(1, 60, false);
        let a = ctx("203.0.113.3", "/api/contact");
        assert!(matches!(f.limiter.admit(&a).await, Decision::Allow(_)));
        assert!(matches!(f.limiter.admit(&a).await, Decision::Reject(_)));

        let other_addr = ctx("203.0.113.4", "/api/contact");
        let other_path = ctx("203.0.113.3", "/api/contact/extra");
        assert!(matches!(f.limiter.admit(&other_addr).await, Decision::Allow(Some(_))));
        assert!(matches!(f.limiter.admit(&other_path).await, Decision::Allow(Some(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exempt_is_uncounted_but_block_still_applies() {
        let f = fixture(1, 60, false);
        let allowed = ctx("10.1.1.1", "/api/contact");
        for _ in 0..10 {
            assert_eq!(f.limiter.admit(&allowed).await, Decision::Allow(None));
        }

        let blocked = ctx("203.0.113.9", "/api/contact");
        f.registry.block(blocked.addr, Duration::from_secs(60), "manual");
        assert_eq!(
            f.limiter.admit(&blocked).await,
            Decision::Reject(Rejection::Blocked)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_successful_uncounts() {
        let f = fixture(2, 900, true);
        let c = ctx("203.0.113.5", "/api/admin/login");
        for _ in 0..5 {
            assert!(matches!(f.limiter.admit(&c).await, Decision::Allow(Some(_))));
            f.limiter.settle(&c, StatusCode::OK).await;
        }

        for _ in 0..2 {
            assert!(matches!(f.limiter.admit(&c).await, Decision::Allow(Some(_))));
            f.limiter.settle(&c, StatusCode::UNAUTHORIZED).await;
        }
        assert!(matches!(f.limiter.admit(&c).await, Decision::Reject(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_key_fn() {
        let f = fixture(1, 60, false);
        let limiter = f.limiter.with_key_fn(Arc::new(|_: &ClientContext| "everyone".to_string()));
        assert!(matches!(limiter.admit(&ctx("198.51.100.1", "/a")).await, Decision::Allow(_)));
        assert!(matches!(limiter.admit(&ctx("198.51.100.2", "/b")).await, Decision::Reject(_)));
    }
}
