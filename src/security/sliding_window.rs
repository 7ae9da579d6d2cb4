//! Sliding-window limiter backed by per-key timestamp logs.
//!
//! Each key holds the admission times inside the trailing window. Logs decay
//! as time passes; idle keys are swept with low probability on each check.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::LimiterConfig;
use crate::http::request::ClientContext;
use crate::observability::events::{EventKind, EventSink, SecurityEvent, Severity};
use crate::observability::metrics;
use crate::security::key::{default_key_fn, KeyFn};
use crate::security::limiter::{Decision, HeaderStyle, RateLimitInfo, Rejection};
use crate::security::registry::AccessRegistry;
use crate::security::store::MAX_WINDOW;

/// Probability that a check also sweeps idle keys.
const SWEEP_PROBABILITY: f64 = 0.01;

pub struct SlidingWindowLimiter {
    name: String,
    window: Duration,
    max: u64,
    message: String,
    logs: DashMap<String, VecDeque<Instant>>,
    registry: Arc<AccessRegistry>,
    events: Arc<dyn EventSink>,
    key_fn: KeyFn,
}

impl SlidingWindowLimiter {
    pub fn new(
        config: &LimiterConfig,
        registry: Arc<AccessRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            window: Duration::from_millis(config.window_ms).min(MAX_WINDOW),
            max: config.max,
            message: config.message.clone(),
            logs: DashMap::new(),
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

    pub fn admit(&self, ctx: &ClientContext) -> Decision {
        if self.registry.is_exempt(ctx) {
            return Decision::Allow(None);
        }
        if self.registry.is_blocked(ctx.addr) {
            return Decision::Reject(Rejection::Blocked);
        }

        let (admitted, info) = self.check_at(&(self.key_fn)(ctx), Instant::now());
        if admitted {
            return Decision::Allow(Some(info));
        }

        self.events.record(
            SecurityEvent::new(EventKind::RateLimitExceeded, Severity::Medium)
                .with_request(ctx)
                .with_details(serde_json::json!({ "limiter": self.name, "limit": self.max })),
        );
        metrics::record_rate_limited(&self.name);
        self.registry.record_violation(ctx.addr);

        Decision::Reject(Rejection::RateLimited {
            message: self.message.clone(),
            retry_after: info.reset_after,
            info,
        })
    }

    /// Evaluate and, if admitted, record a request for `key` at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> (bool, RateLimitInfo) {
        let result = {
            let mut log = self.logs.entry(key.to_string()).or_default();
            while log
                .front()
                .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
            {
                log.pop_front();
            }

            let admitted = (log.len() as u64) < self.max;
            if admitted {
                log.push_back(now);
            }
            let reset_after = log
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);

            (
                admitted,
                RateLimitInfo {
                    limit: self.max,
                    remaining: self.max.saturating_sub(log.len() as u64),
                    reset_after,
                    style: HeaderStyle::Legacy,
                },
            )
        };

        if fastrand::f64() < SWEEP_PROBABILITY {
            self.sweep(now);
        }
        result
    }

    /// Drop logs whose newest timestamp predates the window.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.logs.len();
        self.logs.retain(|_, log| {
            log.back()
                .is_some_and(|t| now.saturating_duration_since(*t) < self.window)
        });
        before.saturating_sub(self.logs.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.logs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimiterKind, SecurityConfig};
    use crate::observability::SecurityEventLog;

    fn limiter(max: u64, window_secs: u64) -> SlidingWindowLimiter {
        let log = Arc::new(SecurityEventLog::default());
        let registry = Arc::new(AccessRegistry::from_config(&SecurityConfig::default(), log.clone()));
        let config = LimiterConfig {
            name: "api".into(),
            kind: LimiterKind::Sliding,
            window_ms: window_secs * 1000,
            max,
            message: "Too many requests".into(),
            skip_successful: false,
            skip_failed: false,
            paths: vec!["/api/".into()],
        };
        SlidingWindowLimiter::new(&config, registry, log)
    }

    #[test]
    fn test_oversized_window_is_clamped() {
        let l = limiter(1, u64::MAX / 1000);
        let t0 = Instant::now();
        let (admitted, info) = l.check_at("k", t0);
        assert!(admitted);
        assert_eq!(info.reset_after, MAX_WINDOW);
        let (admitted, _) = l.check_at("k", t0 + Duration::from_secs(1));
        assert!(!admitted);
    }

    #[test]
    fn test_evenly_spaced_requests_always_admit() {
        let l = limiter(4, 60);
        let t0 = Instant::now();
        // 8 requests over 2 windows, 15s apart: never more than 4 in any 60s.
        for i in 0..8 {
            let (admitted, _) = l.check_at("k", t0 + Duration::from_secs(15 * i));
            assert!(admitted, "request {i} rejected");
        }
    }

    #[test]
    fn test_burst_rejects_only_excess() {
        let l = limiter(3, 60);
        let t0 = Instant::now();
        let results: Vec<bool> = (0..5)
            .map(|i| l.check_at("k", t0 + Duration::from_millis(i)).0)
            .collect();
        assert_eq!(results, vec![true, true, true, false, false]);
    }

    #[test]
    fn test_rejection_metadata_uses_oldest_timestamp() {
        let l = limiter(2, 60);
        let t0 = Instant::now();
        l.check_at("k", t0);
        l.check_at("k", t0 + Duration::from_secs(10));

        let (admitted, info) = l.check_at("k", t0 + Duration::from_secs(20));
        assert!(!admitted);
        assert_eq!(info.limit, 2);
        assert_eq!(info.remaining, 0);
        assert_eq!(info.reset_after, Duration::from_secs(40));

        let (admitted, info) = l.check_at("k", t0 + Duration::from_secs(60));
        assert!(admitted);
        assert_eq!(info.remaining, 0);
        assert_eq!(info.reset_after, Duration::from_secs(10));
    }

    #[test]
    fn test_admission_reports_remaining() {
        let l = limiter(3, 60);
        let (_, info) = l.check_at("k", Instant::now());
        assert_eq!(info.remaining, 2);
        assert_eq!(info.style, HeaderStyle::Legacy);
    }

    #[test]
    fn test_sweep_drops_idle_keys() {
        let l = limiter(3, 60);
        let t0 = Instant::now();
        l.check_at("idle", t0);
        l.check_at("busy", t0 + Duration::from_secs(50));
        assert_eq!(l.sweep(t0 + Duration::from_secs(70)), 1);
        assert_eq!(l.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn test_rejection_escalates() {
        let l = limiter(1, 60);
        let c = ClientContext::anonymous("203.0.113.7".parse().unwrap(), "/api/x");
        assert!(matches!(l.admit(&c), Decision::Allow(Some(_))));
        assert!(matches!(
            l.admit(&c),
            Decision::Reject(Rejection::RateLimited { .. })
        ));
        assert_eq!(l.registry.violations(c.addr), 1);
    }
}
