//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline stages produce:
//!     → events.rs (security events → EventSink)
//!     → metrics.rs (counters, histograms, in-process monitor)
//!     → logging.rs (tracing subscriber setup)
//!
//! Consumers:
//!     → stdout (JSON in production)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Admin API (recent events, monitor snapshot)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Security events go through an injected sink so tests can inspect them
//! - Recording an event or metric never blocks the response path

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventKind, EventSink, SecurityEvent, SecurityEventLog, Severity};
pub use metrics::{MonitorSnapshot, RateLimitMonitor};
