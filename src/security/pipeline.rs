//! Request-defense pipeline.
//!
//! Each stage is an `axum` middleware function over a shared
//! [`SecurityState`]. [`SecurityPipeline::wrap`] installs them with
//! `ServiceBuilder`, so the declared order is the execution order:
//!
//! ```text
//! client_context → block_check → track_metrics → security_headers
//!     → body limit → timeout → sanitize_request → scan_threats
//!     → progressive_delay → CORS → enforce_route_limits → handler
//! ```
//!
//! A stage either calls `next`, waits and then calls `next`, or answers the
//! request itself. Nothing propagates past the stage that rejected.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderName, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use tokio::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

use crate::admin::auth::bearer_identity;
use crate::config::SiteConfig;
use crate::http::request::{ClientContext, CspNonce, Identity, RequestId, X_REQUEST_ID};
use crate::http::response::ApiError;
use crate::observability::events::{EventKind, EventSink, SecurityEvent, Severity};
use crate::observability::metrics::UNMATCHED_ENDPOINT;
use crate::observability::{metrics, RateLimitMonitor};
use crate::security::headers::{generate_nonce, SecurityHeaderComposer};
use crate::security::limiter::{Decision, Limiter, RouteLimiter, BLOCKED_MESSAGE};
use crate::security::proxy::TrustedProxies;
use crate::security::redis_store::RedisStore;
use crate::security::registry::AccessRegistry;
use crate::security::sanitize::RequestSanitizer;
use crate::security::slowdown::ProgressiveDelay;
use crate::security::store::{CounterStore, FallbackStore, MemoryStore};
use crate::security::threat::ThreatScanner;

/// Message returned when strict mode rejects a threat match.
pub const THREAT_REJECTION_MESSAGE: &str = "Request contains invalid characters";

/// Whether the TCP peer was a trusted proxy.
#[derive(Debug, Clone, Copy)]
struct PeerTrusted(bool);

/// Everything the stages share. Built once at startup.
pub struct SecurityState {
    pub registry: Arc<AccessRegistry>,
    pub events: Arc<dyn EventSink>,
    pub monitor: Arc<RateLimitMonitor>,
    pub composer: SecurityHeaderComposer,
    pub scanner: ThreatScanner,
    pub sanitizer: RequestSanitizer,
    pub proxies: TrustedProxies,
    pub slowdown: Option<Limiter>,
    pub routes: Vec<RouteLimiter>,
    pub strict: bool,
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
    pub admin_key: Option<String>,
    memory: Arc<MemoryStore>,
}

/// Cloneable handle to the pipeline state.
#[derive(Clone)]
pub struct SecurityPipeline {
    state: Arc<SecurityState>,
}

impl SecurityPipeline {
    pub fn from_config(config: &SiteConfig, events: Arc<dyn EventSink>) -> Self {
        let registry = Arc::new(AccessRegistry::from_config(&config.security, events.clone()));
        let memory = Arc::new(MemoryStore::new());

        let store: Arc<dyn CounterStore> = match config.rate_limit.redis_url.as_deref() {
            Some(url) => match RedisStore::open(url) {
                Ok(redis) => Arc::new(FallbackStore::new(
                    Arc::new(redis),
                    memory.clone(),
                    events.clone(),
                )),
                Err(err) => {
                    tracing::error!(error = %err, "Invalid Redis URL, using in-memory counters");
                    memory.clone()
                }
            },
            None => {
                tracing::warn!("Using in-memory rate-limit counters; limits are per instance");
                memory.clone()
            }
        };

        let routes = config
            .rate_limit
            .limiters
            .iter()
            .map(|limiter| {
                RouteLimiter::from_config(limiter, store.clone(), registry.clone(), events.clone())
            })
            .collect();

        let slowdown = config.rate_limit.slowdown.enabled.then(|| {
            Limiter::Delay(ProgressiveDelay::new(
                &config.rate_limit.slowdown,
                store.clone(),
                registry.clone(),
            ))
        });

        let admin_key = config.admin.enabled.then(|| config.admin.api_key.clone());

        Self {
            state: Arc::new(SecurityState {
                registry,
                events,
                monitor: Arc::new(RateLimitMonitor::new()),
                composer: SecurityHeaderComposer::new(&config.csp, config.environment),
                scanner: ThreatScanner::new(),
                sanitizer: RequestSanitizer::from_config(&config.security),
                proxies: TrustedProxies::from_config(&config.security.trusted_proxies),
                slowdown,
                routes,
                strict: config.security.strict,
                max_body_bytes: config.listener.max_body_bytes,
                request_timeout: Duration::from_secs(config.listener.request_timeout_secs),
                admin_key,
                memory,
            }),
        }
    }

    pub fn state(&self) -> &Arc<SecurityState> {
        &self.state
    }

    pub fn registry(&self) -> &Arc<AccessRegistry> {
        &self.state.registry
    }

    pub fn monitor(&self) -> &Arc<RateLimitMonitor> {
        &self.state.monitor
    }

    /// Install every stage around `router`. The transport limits sit inside
    /// `security_headers` so their 408 and 413 answers carry the headers too.
    #[allow(deprecated)]
    pub fn wrap(&self, router: Router, cors: CorsLayer) -> Router {
        let state = self.state.clone();
        router.layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(state.clone(), client_context))
                .layer(middleware::from_fn_with_state(state.clone(), block_check))
                .layer(middleware::from_fn_with_state(state.clone(), track_metrics))
                .layer(middleware::from_fn_with_state(state.clone(), security_headers))
                .layer(RequestBodyLimitLayer::new(state.max_body_bytes))
                .map_request(into_axum_body)
                .layer(TimeoutLayer::new(state.request_timeout))
                .layer(middleware::from_fn_with_state(state.clone(), sanitize_request))
                .layer(middleware::from_fn_with_state(state.clone(), scan_threats))
                .layer(middleware::from_fn_with_state(state.clone(), progressive_delay))
                .layer(cors)
                .layer(middleware::from_fn_with_state(state, enforce_route_limits)),
        )
    }

    /// Drop lapsed counters, idle sliding logs and expired blocks.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let counters = self.state.memory.purge_expired(now);
        let blocks = self.state.registry.purge_expired(now);
        let logs: usize = self
            .state
            .routes
            .iter()
            .map(|route| match &route.limiter {
                Limiter::Sliding(l) => l.sweep(now),
                _ => 0,
            })
            .sum();
        counters + blocks + logs
    }
}

/// Re-box the limited body so the axum middleware below the limit accepts it.
fn into_axum_body<B>(req: Request<B>) -> Request<Body>
where
    B: axum::body::HttpBody<Data = axum::body::Bytes> + Send + 'static,
    B::Error: Into<axum::BoxError>,
{
    req.map(Body::new)
}

fn client(req: &Request<Body>) -> Result<ClientContext, Response> {
    req.extensions()
        .get::<ClientContext>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("client context missing".into()).into_response())
}

fn is_report_path(state: &SecurityState, path: &str) -> bool {
    path == state.composer.report_uri()
}

/// Resolve the client address and identity.
pub async fn client_context(
    State(state): State<Arc<SecurityState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let addr = state.proxies.client_addr(peer.ip(), req.headers());
    let trusted = state.proxies.is_trusted(&peer.ip());

    let identity = state
        .admin_key
        .as_deref()
        .and_then(|key| bearer_identity(req.headers(), key))
        .or_else(|| req.extensions().get::<Identity>().cloned());

    let ctx = ClientContext::new(
        addr,
        identity,
        req.method().clone(),
        req.uri().path(),
        req.headers(),
    );
    req.extensions_mut().insert(ctx);
    req.extensions_mut().insert(PeerTrusted(trusted));
    next.run(req).await
}

pub async fn block_check(
    State(state): State<Arc<SecurityState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ctx = match client(&req) {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };
    if !state.registry.is_blocked(ctx.addr) {
        return next.run(req).await;
    }

    state.events.record(
        SecurityEvent::new(EventKind::BlockedRequest, Severity::Low).with_request(&ctx),
    );
    metrics::record_blocked();
    ApiError::Forbidden(BLOCKED_MESSAGE.to_string()).into_response()
}

/// Record the outcome once the response is final.
pub async fn track_metrics(
    State(state): State<Arc<SecurityState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = std::time::Instant::now();
    let ctx = match client(&req) {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    let response = next.run(req).await;
    let status = response.status();
    metrics::record_request(status.as_u16(), start);
    let endpoint = if status == StatusCode::NOT_FOUND {
        UNMATCHED_ENDPOINT
    } else {
        ctx.path.as_str()
    };
    state
        .monitor
        .track(endpoint, ctx.addr, status == StatusCode::TOO_MANY_REQUESTS);
    response
}

/// Assign the request ID and nonce, then attach security headers.
pub async fn security_headers(
    State(state): State<Arc<SecurityState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let nonce = state.composer.nonce_enabled().then(generate_nonce);
    let path = req.uri().path().to_string();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut()
            .insert(HeaderName::from_static(X_REQUEST_ID), value);
    }
    req.extensions_mut().insert(RequestId(request_id.clone()));
    if let Some(nonce) = &nonce {
        req.extensions_mut().insert(CspNonce(nonce.clone()));
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    for (name, value) in state.composer.compose(&path, nonce.as_deref()) {
        if let Some(name) = name {
            headers.insert(name, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(HeaderName::from_static(X_REQUEST_ID), value);
    }
    response
}

pub async fn sanitize_request(
    State(state): State<Arc<SecurityState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let trusted = req
        .extensions()
        .get::<PeerTrusted>()
        .is_some_and(|t| t.0);
    state.sanitizer.strip_forwarding(req.headers_mut(), trusted);

    if let Err(err) = state
        .sanitizer
        .check_content_type(req.method(), req.headers())
    {
        tracing::debug!(path = %req.uri().path(), "Rejected content type");
        return err.into_response();
    }

    let path = req.uri().path().to_string();
    if !state.sanitizer.is_lead_capture(&path) {
        return next.run(req).await;
    }
    if let Err(err) = state.sanitizer.check_declared_length(&path, req.headers()) {
        return err.into_response();
    }

    let (parts, body) = req.into_parts();
    match axum::body::to_bytes(body, state.sanitizer.lead_capture_max_bytes()).await {
        Ok(bytes) => next.run(Request::from_parts(parts, Body::from(bytes))).await,
        Err(_) => ApiError::PayloadTooLarge.into_response(),
    }
}

/// Serialize the request the way it is scanned: path, decoded query as
/// JSON, body text, headers as JSON.
fn scan_input(parts: &axum::http::request::Parts, body: &[u8]) -> (String, String, String, String) {
    let query: BTreeMap<String, String> = parts
        .uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let headers: BTreeMap<&str, &str> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect();

    (
        parts.uri.path().to_string(),
        serde_json::to_string(&query).unwrap_or_default(),
        body_text(parts, body),
        serde_json::to_string(&headers).unwrap_or_default(),
    )
}

/// Form bodies are decoded into a JSON object so percent-encoded line breaks
/// scan the same way a JSON body's escaped ones do.
fn body_text(parts: &axum::http::request::Parts, body: &[u8]) -> String {
    let is_form = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if !is_form {
        return String::from_utf8_lossy(body).into_owned();
    }
    let fields: BTreeMap<String, String> = url::form_urlencoded::parse(body).into_owned().collect();
    serde_json::to_string(&fields).unwrap_or_default()
}

pub async fn scan_threats(
    State(state): State<Arc<SecurityState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if is_report_path(&state, req.uri().path()) {
        return next.run(req).await;
    }
    let ctx = match client(&req) {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => return ApiError::PayloadTooLarge.into_response(),
    };

    let (path, query, text, headers) = scan_input(&parts, &bytes);
    if let Some(found) = state.scanner.scan_parts(&path, &query, &text, &headers) {
        state.events.record(
            SecurityEvent::new(EventKind::ThreatDetected, Severity::Medium)
                .with_request(&ctx)
                .with_details(serde_json::json!({
                    "pattern": found.pattern,
                    "matched": found.matched,
                    "strict": state.strict,
                })),
        );
        metrics::record_threat(found.pattern);
        if state.strict {
            return ApiError::BadRequest(THREAT_REJECTION_MESSAGE.to_string()).into_response();
        }
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

pub async fn progressive_delay(
    State(state): State<Arc<SecurityState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(slowdown) = &state.slowdown else {
        return next.run(req).await;
    };
    let ctx = match client(&req) {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    if let Decision::Delay(delay) = slowdown.admit(&ctx).await {
        tokio::time::sleep(delay).await;
    }
    let response = next.run(req).await;
    slowdown.settle(&ctx, response.status()).await;
    response
}

/// Check every limiter whose path prefix matches, in order. The first
/// rejection answers the request.
pub async fn enforce_route_limits(
    State(state): State<Arc<SecurityState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if is_report_path(&state, req.uri().path()) {
        return next.run(req).await;
    }
    let ctx = match client(&req) {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    let mut admitted = Vec::new();
    let mut budgets = Vec::new();
    for route in state.routes.iter().filter(|r| r.matches(&ctx.path)) {
        match route.limiter.admit(&ctx).await {
            Decision::Allow(info) => budgets.extend(info),
            Decision::Delay(delay) => tokio::time::sleep(delay).await,
            Decision::Reject(rejection) => {
                tracing::debug!(limiter = route.limiter.name(), address = %ctx.addr, path = %ctx.path, "Request rejected");
                let (err, info) = rejection.into_error();
                let mut response = err.into_response();
                if let Some(info) = info {
                    info.apply(response.headers_mut());
                }
                return response;
            }
        }
        admitted.push(route);
    }

    let mut response = next.run(req).await;
    // First matching limiter wins when two share a header family.
    for info in budgets.iter().rev() {
        info.apply(response.headers_mut());
    }
    let status = response.status();
    for route in admitted {
        route.limiter.settle(&ctx, status).await;
    }
    response
}
