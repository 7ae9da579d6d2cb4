//! Operator API for the request-defense layer.
//!
//! # Data Flow
//! ```text
//! Authorization: Bearer <key>
//!     → pipeline client_context (admin identity, exempt from limiting)
//!     → auth.rs (401 unless admin identity)
//!     → handlers.rs (registry, monitor, event log)
//! ```
//!
//! # Design Decisions
//! - Admin requests still pass the block check; a blocked operator address stays blocked
//! - Mounted only when `admin.enabled`

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::observability::SecurityEventLog;
use crate::security::SecurityPipeline;

#[derive(Clone)]
pub struct AdminState {
    pub pipeline: SecurityPipeline,
    pub events: Arc<SecurityEventLog>,
    pub started_at: Instant,
}

/// Routes relative to `/api/admin`.
pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/metrics", get(get_metrics))
        .route("/metrics/reset", post(reset_metrics))
        .route("/blocked", get(get_blocked))
        .route("/block", post(block_address))
        .route("/block/{ip}", delete(unblock_address))
        .route("/allowlist", post(allow_address))
        .route("/allowlist/{ip}", delete(disallow_address))
        .route("/blocklist", post(deny_address))
        .route("/events", get(get_events))
        .layer(middleware::from_fn(admin_auth_middleware))
        .with_state(state)
}
