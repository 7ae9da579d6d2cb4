//! Progressive delay: slow repeat offenders down instead of rejecting them.
//!
//! Counts share the fixed-window store under the `sd:` prefix. Requests that
//! end in a success are uncounted afterwards, so only failures accumulate.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use crate::config::SlowdownConfig;
use crate::http::request::ClientContext;
use crate::security::key::{default_key_fn, KeyFn};
use crate::security::limiter::Decision;
use crate::security::registry::AccessRegistry;
use crate::security::store::CounterStore;

pub struct ProgressiveDelay {
    window: Duration,
    delay_after: u64,
    delay: Duration,
    max_delay: Duration,
    store: Arc<dyn CounterStore>,
    registry: Arc<AccessRegistry>,
    key_fn: KeyFn,
}

impl ProgressiveDelay {
    pub fn new(
        config: &SlowdownConfig,
        store: Arc<dyn CounterStore>,
        registry: Arc<AccessRegistry>,
    ) -> Self {
        Self {
            window: Duration::from_millis(config.window_ms),
            delay_after: config.delay_after,
            delay: Duration::from_millis(config.delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            store,
            registry,
            key_fn: default_key_fn(),
        }
    }

    /// Delay for the `count`-th counted request in a window.
    pub fn delay_for(&self, count: u64) -> Duration {
        let over = count.saturating_sub(self.delay_after);
        if over == 0 {
            return Duration::ZERO;
        }
        self.delay
            .checked_mul(u32::try_from(over).unwrap_or(u32::MAX))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn store_key(&self, ctx: &ClientContext) -> String {
        format!("sd:{}", (self.key_fn)(ctx))
    }

    /// Never rejects.
    pub async fn admit(&self, ctx: &ClientContext) -> Decision {
        if self.registry.is_exempt(ctx) {
            return Decision::Allow(None);
        }
        match self.store.increment(&self.store_key(ctx), self.window).await {
            Ok(counted) => match self.delay_for(counted.count) {
                Duration::ZERO => Decision::Allow(None),
                delay => {
                    tracing::debug!(address = %ctx.addr, count = counted.count, delay_ms = delay.as_millis() as u64, "Delaying request");
                    Decision::Delay(delay)
                }
            },
            Err(err) => {
                tracing::error!(error = %err, "Counter store failed, skipping slowdown");
                Decision::Allow(None)
            }
        }
    }

    pub async fn settle(&self, ctx: &ClientContext, status: StatusCode) {
        if status.as_u16() >= 400 || self.registry.is_exempt(ctx) {
            return;
        }
        if let Err(err) = self.store.decrement(&self.store_key(ctx)).await {
            tracing::error!(error = %err, "Failed to uncount request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::observability::SecurityEventLog;
    use crate::security::store::MemoryStore;

    fn slowdown(delay_after: u64) -> ProgressiveDelay {
        let log = Arc::new(SecurityEventLog::default());
        let registry = Arc::new(AccessRegistry::from_config(&SecurityConfig::default(), log));
        let config = SlowdownConfig {
            enabled: true,
            window_ms: 60_000,
            delay_after,
            delay_ms: 500,
            max_delay_ms: 2_000,
        };
        ProgressiveDelay::new(&config, Arc::new(MemoryStore::new()), registry)
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let s = slowdown(2);
        assert_eq!(s.delay_for(1), Duration::ZERO);
        assert_eq!(s.delay_for(2), Duration::ZERO);
        assert_eq!(s.delay_for(3), Duration::from_millis(500));
        assert_eq!(s.delay_for(4), Duration::from_millis(1000));
        assert_eq!(s.delay_for(50), Duration::from_millis(2000));
        assert_eq!(s.delay_for(u64::MAX), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_accumulate_successes_do_not() {
        let s = slowdown(2);
        let c = ClientContext::anonymous("203.0.113.20".parse().unwrap(), "/api/contact");

        for _ in 0..10 {
            assert_eq!(s.admit(&c).await, Decision::Allow(None));
            s.settle(&c, StatusCode::OK).await;
        }

        let mut decisions = Vec::new();
        for _ in 0..4 {
            decisions.push(s.admit(&c).await);
            s.settle(&c, StatusCode::BAD_REQUEST).await;
        }
        assert_eq!(
            decisions,
            vec![
                Decision::Allow(None),
                Decision::Allow(None),
                Decision::Delay(Duration::from_millis(500)),
                Decision::Delay(Duration::from_millis(1000)),
            ]
        );
    }
}
