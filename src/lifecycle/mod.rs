//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → Metrics exporter → Server → Bind → Serve
//!
//! Background (maintenance.rs):
//!     Every minute → purge expired counters, sliding logs, blocks
//!
//! Shutdown (signals.rs → shutdown.rs):
//!     SIGTERM/SIGINT → broadcast → stop accepting, drain, stop maintenance
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listener
//! - One broadcast signal reaches every long-running task

pub mod maintenance;
pub mod shutdown;
pub mod signals;
pub mod startup;
