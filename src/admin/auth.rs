//! Bearer-token authentication for the admin API.

use axum::{
    body::Body,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::request::{ClientContext, Identity};
use crate::http::response::ApiError;

/// Identity granted to holders of the admin API key.
pub const ADMIN_ID: &str = "admin";

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Admin identity when `Authorization: Bearer <api_key>` matches.
pub fn bearer_identity(headers: &HeaderMap, api_key: &str) -> Option<Identity> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?
        .strip_prefix("Bearer ")?
        .trim();
    if api_key.is_empty() || !constant_time_eq(token.as_bytes(), api_key.as_bytes()) {
        return None;
    }
    Some(Identity::admin(ADMIN_ID))
}

/// Admit only requests the pipeline identified as admin.
pub async fn admin_auth_middleware(request: Request<Body>, next: Next) -> Response {
    let is_admin = request
        .extensions()
        .get::<ClientContext>()
        .and_then(|ctx| ctx.identity.as_ref())
        .is_some_and(Identity::is_admin);

    if is_admin {
        next.run(request).await
    } else {
        tracing::warn!(path = %request.uri().path(), "Rejected admin request without valid credentials");
        ApiError::Unauthorized.into_response()
    }
}
