//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::net::{IpAddr, SocketAddr};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Method, Request, Response},
    Router,
};
use async_trait::async_trait;
use ciso_site::api::notify::{Notifier, NotifyError};
use ciso_site::api::storage::{Contact, StarterKitDownload};
use ciso_site::config::SiteConfig;
use serde_json::Value;
use tower::ServiceExt;

pub const ADMIN_KEY: &str = "integration-admin-key";

/// Defaults with the admin API on and slowdown off.
pub fn test_config() -> SiteConfig {
    let mut config = SiteConfig::default();
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    config.rate_limit.slowdown.enabled = false;
    config
}

/// A notifier whose delivery always fails.
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn contact_received(&self, _contact: &Contact) -> Result<(), NotifyError> {
        Err(NotifyError::Delivery("smtp relay unreachable".into()))
    }

    async fn send_starter_kit(&self, _download: &StarterKitDownload) -> Result<(), NotifyError> {
        Err(NotifyError::Delivery("smtp relay unreachable".into()))
    }
}

pub fn contact_body() -> Value {
    serde_json::json!({
        "name": "Dana Whitfield",
        "email": "dana@example.com",
        "company": "Riverbend Health",
        "serviceType": "vciso",
        "message": "Looking for help preparing for a HIPAA assessment next quarter.",
    })
}

/// A request as if it arrived over TCP from `peer`.
pub fn request(method: Method, path: &str, peer: &str, body: Option<&Value>) -> Request<Body> {
    let ip: IpAddr = peer.parse().expect("test peer address");
    let builder = Request::builder().method(method).uri(path);
    let mut req = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("valid request");
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::new(ip, 41000)));
    req
}

pub fn post_json(path: &str, peer: &str, body: &Value) -> Request<Body> {
    request(Method::POST, path, peer, Some(body))
}

pub fn get(path: &str, peer: &str) -> Request<Body> {
    request(Method::GET, path, peer, None)
}

/// Attach the admin bearer token.
pub fn as_admin(mut req: Request<Body>) -> Request<Body> {
    req.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {ADMIN_KEY}").parse().expect("header value"),
    );
    req
}

pub async fn send(router: &Router, req: Request<Body>) -> Response<Body> {
    router.clone().oneshot(req).await.expect("router is infallible")
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
