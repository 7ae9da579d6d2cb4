//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → proxy.rs (client address from trusted forwarding headers)
//!     → registry.rs (blocked? → 403)
//!     → headers.rs (request ID, CSP nonce, security headers)
//!     → sanitize.rs (forwarding headers, content type, lead-capture size)
//!     → threat.rs (signature scan, reject only in strict mode)
//!     → slowdown.rs (progressive delay)
//!     → rate_limit.rs / sliding_window.rs (per route family → 429)
//!     → Pass to handler
//! ```
//!
//! # Design Decisions
//! - Registries and counters are owned structs built once and shared by `Arc`
//! - Limiter flavors are a closed enum with one `admit` contract
//! - Counter storage is a trait; Redis is optional and falls back to memory
//! - Allowlisting exempts from limiting, never from a block

pub mod headers;
pub mod key;
pub mod limiter;
pub mod pipeline;
pub mod proxy;
pub mod rate_limit;
pub mod redis_store;
pub mod registry;
pub mod sanitize;
pub mod sliding_window;
pub mod slowdown;
pub mod store;
pub mod threat;

pub use limiter::{Decision, Limiter, RateLimitInfo, Rejection, RouteLimiter};
pub use pipeline::{SecurityPipeline, SecurityState};
pub use registry::AccessRegistry;
pub use store::{CounterStore, FallbackStore, MemoryStore, StoreError, WindowCount};
