//! Structured security events.
//!
//! Pipeline stages never write log lines for security decisions directly;
//! they build a [`SecurityEvent`] and hand it to an [`EventSink`]. The default
//! sink, [`SecurityEventLog`], emits a `tracing` record and keeps a bounded
//! history for the admin API.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use uuid::Uuid;

use crate::http::request::ClientContext;

/// Default number of events retained by [`SecurityEventLog`].
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ThreatDetected,
    RateLimitExceeded,
    AddressBlocked,
    BlockedRequest,
    CspViolation,
    StoreFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One security-relevant occurrence.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub severity: Severity,
    pub address: Option<IpAddr>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp_ms: u64,
    pub details: serde_json::Value,
}

impl SecurityEvent {
    pub fn new(kind: EventKind, severity: Severity) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            address: None,
            path: None,
            method: None,
            user_agent: None,
            timestamp_ms: now_ms(),
            details: serde_json::Value::Null,
        }
    }

    /// Copy address, path, method and user agent from the request.
    pub fn with_request(mut self, ctx: &ClientContext) -> Self {
        self.address = Some(ctx.addr);
        self.path = Some(ctx.path.clone());
        self.method = Some(ctx.method.to_string());
        self.user_agent = ctx.user_agent.clone();
        self
    }

    pub fn with_address(mut self, addr: IpAddr) -> Self {
        self.address = Some(addr);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Destination for security events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn record(&self, event: SecurityEvent);
}

/// Logs every event through `tracing` and retains the most recent ones.
pub struct SecurityEventLog {
    events: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
}

impl SecurityEventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    /// The most recent `count` events, oldest first.
    pub fn recent(&self, count: usize) -> Vec<SecurityEvent> {
        let events = self.events.lock().expect("event log mutex poisoned");
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    /// Number of retained events of the given kind.
    pub fn count(&self, kind: EventKind) -> usize {
        let events = self.events.lock().expect("event log mutex poisoned");
        events.iter().filter(|e| e.kind == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event log mutex poisoned").clear();
    }
}

impl Default for SecurityEventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventSink for SecurityEventLog {
    fn record(&self, event: SecurityEvent) {
        let address = event.address.map(|a| a.to_string()).unwrap_or_default();
        let path = event.path.as_deref().unwrap_or_default();
        let method = event.method.as_deref().unwrap_or_default();
        let user_agent = event.user_agent.as_deref().unwrap_or_default();

        if event.severity >= Severity::High {
            tracing::error!(
                target: "security",
                event_id = %event.id,
                kind = ?event.kind,
                severity = ?event.severity,
                address = %address,
                path,
                method,
                user_agent,
                timestamp_ms = event.timestamp_ms,
                details = %event.details,
                "Security event"
            );
        } else {
            tracing::warn!(
                target: "security",
                event_id = %event.id,
                kind = ?event.kind,
                severity = ?event.severity,
                address = %address,
                path,
                method,
                user_agent,
                timestamp_ms = event.timestamp_ms,
                details = %event.details,
                "Security event"
            );
        }

        let mut events = self.events.lock().expect("event log mutex poisoned");
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded() {
        let log = SecurityEventLog::new(3);
        for i in 0..5 {
            log.record(
                SecurityEvent::new(EventKind::ThreatDetected, Severity::Medium)
                    .with_details(serde_json::json!({ "n": i })),
            );
        }

        let recent = log.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].details["n"], 2);
        assert_eq!(recent[2].details["n"], 4);
    }

    #[test]
    fn test_recent_returns_tail() {
        let log = SecurityEventLog::default();
        log.record(SecurityEvent::new(EventKind::CspViolation, Severity::Low));
        log.record(SecurityEvent::new(EventKind::AddressBlocked, Severity::High));

        let recent = log.recent(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, EventKind::AddressBlocked);
        assert_eq!(log.count(EventKind::CspViolation), 1);
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = SecurityEvent::new(EventKind::RateLimitExceeded, Severity::Medium)
            .with_address("10.0.0.1".parse().unwrap());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "rate_limit_exceeded");
        assert_eq!(json["address"], "10.0.0.1");
        assert!(json["timestampMs"].as_u64().unwrap() > 0);
    }
}
