//! Counter storage for fixed-window limiters and the progressive delay.
//!
//! # Design Decisions
//! - One trait, two backends: in-process ([`MemoryStore`]) and Redis
//! - Increment is atomic per key and starts a fresh window when the old one lapsed
//! - [`FallbackStore`] degrades to memory on the first backend error and stays there
//!
//! [`MemoryStore`] counts per process only. Running several instances behind a
//! load balancer multiplies the effective limits; use the Redis backend there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::observability::events::{EventKind, EventSink, SecurityEvent, Severity};

/// Longest counting window. Longer windows are clamped to it.
pub const MAX_WINDOW: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("unexpected store reply: {0}")]
    Reply(String),
}

/// Counter state after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    /// Time until the window resets.
    pub reset_after: Duration,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add one to `key`, opening a window of length `window` if none is live.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;

    /// Remove one from `key` if it is live. Never goes below zero.
    async fn decrement(&self, key: &str) -> Result<(), StoreError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Instant,
}

/// In-process counters keyed by string.
#[derive(Default)]
pub struct MemoryStore {
    counters: DashMap<String, Counter>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_at(&self, key: &str, window: Duration, now: Instant) -> WindowCount {
        let expires_at = now.checked_add(window.min(MAX_WINDOW)).unwrap_or(now);
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert(Counter {
                count: 0,
                expires_at,
            });
        if entry.expires_at <= now {
            *entry = Counter {
                count: 0,
                expires_at,
            };
        }
        entry.count += 1;
        WindowCount {
            count: entry.count,
            reset_after: entry.expires_at.saturating_duration_since(now),
        }
    }

    pub fn decrement_at(&self, key: &str, now: Instant) {
        if let Some(mut entry) = self.counters.get_mut(key) {
            if entry.expires_at > now {
                entry.count = entry.count.saturating_sub(1);
            }
        }
    }

    /// Current count for `key`, zero when absent or lapsed.
    pub fn current(&self, key: &str, now: Instant) -> u64 {
        self.counters
            .get(key)
            .filter(|c| c.expires_at > now)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    /// Drop lapsed windows. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, c| c.expires_at > now);
        before.saturating_sub(self.counters.len())
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        Ok(self.increment_at(key, window, Instant::now()))
    }

    async fn decrement(&self, key: &str) -> Result<(), StoreError> {
        self.decrement_at(key, Instant::now());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Wraps a shared backend and switches to in-process counting after the
/// first backend failure.
pub struct FallbackStore {
    primary: Arc<dyn CounterStore>,
    fallback: Arc<MemoryStore>,
    degraded: AtomicBool,
    events: Arc<dyn EventSink>,
}

impl FallbackStore {
    pub fn new(
        primary: Arc<dyn CounterStore>,
        fallback: Arc<MemoryStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            primary,
            fallback,
            degraded: AtomicBool::new(false),
            events,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn degrade(&self, err: &StoreError) {
        if self.degraded.swap(true, Ordering::Relaxed) {
            return;
        }
        tracing::error!(
            backend = self.primary.name(),
            error = %err,
            "Counter store unavailable, using in-memory counters"
        );
        self.events.record(
            SecurityEvent::new(EventKind::StoreFallback, Severity::High).with_details(
                serde_json::json!({ "backend": self.primary.name(), "error": err.to_string() }),
            ),
        );
    }
}

#[async_trait]
impl CounterStore for FallbackStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        if !self.is_degraded() {
            match self.primary.increment(key, window).await {
                Ok(count) => return Ok(count),
                Err(err) => self.degrade(&err),
            }
        }
        self.fallback.increment(key, window).await
    }

    async fn decrement(&self, key: &str) -> Result<(), StoreError> {
        if !self.is_degraded() {
            match self.primary.decrement(key).await {
                Ok(()) => return Ok(()),
                Err(err) => self.degrade(&err),
            }
        }
        self.fallback.decrement(key).await
    }

    fn name(&self) -> &'static str {
        if self.is_degraded() {
            self.fallback.name()
        } else {
            self.primary.name()
        }
    }
}
