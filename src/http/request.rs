//! Per-request context shared by the pipeline stages.
//!
//! # Responsibilities
//! - Resolve the client address once (trusted-proxy aware)
//! - Carry the optional caller identity supplied by the identity provider
//! - Carry the request ID and CSP nonce for downstream correlation
//!
//! # Design Decisions
//! - Everything lives in request extensions; no global state
//! - The context is built by the first pipeline stage and read-only afterwards

use std::net::IpAddr;

use axum::http::{HeaderMap, Method};

/// Header carrying the per-request identifier.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Header carrying a rate-limit bypass key.
pub const X_API_KEY: &str = "x-api-key";

/// Role granted to operators.
pub const ADMIN_ROLE: &str = "admin";

/// Caller identity, when an identity provider recognized the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub role: String,
}

impl Identity {
    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: ADMIN_ROLE.to_string(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

/// Unique identifier generated for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// CSP nonce for inline script and style tags rendered for this request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CspNonce(pub String);

/// Client attributes the defense stages decide on.
#[derive(Debug, Clone)]
pub struct ClientContext {
    /// Resolved client address (after trusted-proxy handling).
    pub addr: IpAddr,
    pub identity: Option<Identity>,
    pub method: Method,
    pub path: String,
    pub api_key: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientContext {
    /// Build the context from already-resolved address and identity.
    pub fn new(
        addr: IpAddr,
        identity: Option<Identity>,
        method: Method,
        path: impl Into<String>,
        headers: &HeaderMap,
    ) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        Self {
            addr,
            identity,
            method,
            path: path.into(),
            api_key: header(X_API_KEY),
            user_agent: header("user-agent"),
        }
    }

    /// Context for `GET path` from `addr` with no headers. Used by tests and tooling.
    pub fn anonymous(addr: IpAddr, path: impl Into<String>) -> Self {
        Self::new(addr, None, Method::GET, path, &HeaderMap::new())
    }
}
