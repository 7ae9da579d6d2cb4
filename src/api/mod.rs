//! Site API behind the request-defense pipeline.
//!
//! # Data Flow
//! ```text
//! POST /api/contact | /api/newsletter | /api/starter-kit
//!     → forms.rs (decode, validate)
//!     → storage.rs (persist in memory)
//!     → notify.rs (operator / requester notification)
//!
//! POST /api/csp-report
//!     → csp_report.rs (security event, always 204)
//! ```
//!
//! # Design Decisions
//! - Handlers stay thin; every policy decision happens in the pipeline
//! - Notification delivery is a trait so real senders stay out of this crate

pub mod csp_report;
pub mod forms;
pub mod notify;
pub mod storage;

use std::sync::Arc;

use axum::{routing::post, Router};

use crate::observability::EventSink;
use self::notify::Notifier;
use self::storage::MemoryStorage;

#[derive(Clone)]
pub struct ApiState {
    pub storage: Arc<MemoryStorage>,
    pub notifier: Arc<dyn Notifier>,
    pub events: Arc<dyn EventSink>,
}

/// Form routes plus the CSP report endpoint when `report_uri` is a local path.
pub fn setup_api_router(state: ApiState, report_uri: &str) -> Router {
    let router = Router::new()
        .route("/api/contact", post(forms::submit_contact))
        .route("/api/newsletter", post(forms::subscribe_newsletter))
        .route("/api/starter-kit", post(forms::request_starter_kit));
    let router = if report_uri.starts_with('/') {
        router.route(report_uri, post(csp_report::receive_csp_report))
    } else {
        router
    };
    router.with_state(state)
}
