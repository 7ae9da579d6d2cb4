//! Request-defense layer and site API for the consulting website.
//!
//! Every request passes through [`security::SecurityPipeline`]: block check,
//! security headers, sanitization, threat scanning, progressive delay and
//! per-route rate limits, before reaching the handlers in [`api`].

pub mod admin;
pub mod api;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::SiteConfig;
pub use http::SiteServer;
pub use lifecycle::shutdown::Shutdown;
