//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, transport limits, tracing)
//!     → security pipeline (see security/mod.rs)
//!     → request.rs (client context, request ID, CSP nonce in extensions)
//!     → handler
//!     → response.rs (uniform JSON error bodies)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{ClientContext, CspNonce, Identity, RequestId, X_REQUEST_ID};
pub use response::ApiError;
pub use server::SiteServer;
