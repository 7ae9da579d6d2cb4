//! End-to-end behavior of the request-defense pipeline.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use ciso_site::observability::events::EventKind;
use ciso_site::security::limiter::BLOCKED_MESSAGE;
use ciso_site::security::pipeline::THREAT_REJECTION_MESSAGE;
use ciso_site::security::registry::ABUSE_BLOCK_REASON;
use std::sync::Arc;

use ciso_site::security::registry::MAX_BLOCK_DURATION;
use ciso_site::SiteServer;
use serde_json::json;

mod common;
use common::*;

#[tokio::test]
async fn test_contact_abuse_is_limited() {
    let server = SiteServer::new(test_config());
    let router = server.router();
    let body = contact_body();

    for i in 0..5 {
        let response = send(&router, post_json("/api/contact", "198.51.100.20", &body)).await;
        assert_eq!(response.status(), StatusCode::OK, "submission {i}");
        assert_eq!(response.headers()["ratelimit-limit"], "5");
    }

    let response = send(&router, post_json("/api/contact", "198.51.100.20", &body)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_header: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(response.headers()["ratelimit-remaining"], "0");

    let json = json_body(response).await;
    assert_eq!(json["error"], "Too Many Requests");
    assert!(json["message"].as_str().unwrap().contains("contact form"));
    let retry_after = json["retryAfter"].as_u64().unwrap();
    assert!(retry_after > 0 && retry_after <= 900);
    assert_eq!(retry_after, retry_header);

    assert_eq!(server.storage().contact_count(), 5);
    assert_eq!(server.events().count(EventKind::RateLimitExceeded), 1);

    // Another client has its own budget.
    let response = send(&router, post_json("/api/contact", "198.51.100.21", &body)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_allowlisted_address_is_never_limited_but_can_be_blocked() {
    let mut config = test_config();
    config.security.allowlist = vec!["198.51.100.30".to_string()];
    let server = SiteServer::new(config);
    let router = server.router();
    let body = contact_body();

    for _ in 0..8 {
        let response = send(&router, post_json("/api/contact", "198.51.100.30", &body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("ratelimit-limit").is_none());
    }

    let addr = "198.51.100.30".parse().unwrap();
    server
        .pipeline()
        .registry()
        .block(addr, std::time::Duration::from_secs(60), "manual");

    let response = send(&router, post_json("/api/contact", "198.51.100.30", &body)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = json_body(response).await;
    assert_eq!(json["message"], BLOCKED_MESSAGE);
    assert_eq!(server.events().count(EventKind::BlockedRequest), 1);
}

#[tokio::test]
async fn test_repeated_violations_escalate_to_block() {
    let server = SiteServer::new(test_config());
    let router = server.router();
    let body = contact_body();
    let peer = "203.0.113.40";

    for _ in 0..5 {
        let response = send(&router, post_json("/api/contact", peer, &body)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    // Violations 1 through 10 stay below the threshold.
    for _ in 0..10 {
        let response = send(&router, post_json("/api/contact", peer, &body)).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
    assert!(!server.pipeline().registry().is_blocked(peer.parse().unwrap()));

    // The eleventh is still answered with 429 but places the block.
    let response = send(&router, post_json("/api/contact", peer, &body)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(server.pipeline().registry().is_blocked(peer.parse().unwrap()));

    let snapshot = server.pipeline().registry().snapshot();
    assert_eq!(snapshot.temporary.len(), 1);
    assert_eq!(snapshot.temporary[0].reason, ABUSE_BLOCK_REASON);
    assert!(snapshot.temporary[0].expires_in_secs > 3500);

    // Blocked everywhere, not only on the limited route.
    let response = send(&router, get("/health", peer)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(server.events().count(EventKind::AddressBlocked), 1);
}

#[tokio::test]
async fn test_threat_match_is_logged_but_allowed_by_default() {
    let server = SiteServer::new(test_config());
    let router = server.router();

    let mut body = contact_body();
    body["message"] = json!("<script>alert(document.cookie)</script> please call me");
    let response = send(&router, post_json("/api/contact", "198.51.100.50", &body)).await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(server.events().count(EventKind::ThreatDetected), 1);
    let event = server
        .events()
        .recent(10)
        .into_iter()
        .find(|e| e.kind == EventKind::ThreatDetected)
        .unwrap();
    assert_eq!(event.details["pattern"], "script_tag");
    assert_eq!(event.details["strict"], false);
    assert_eq!(event.path.as_deref(), Some("/api/contact"));
}

#[tokio::test]
async fn test_strict_mode_rejects_threats() {
    let mut config = test_config();
    config.security.strict = true;
    let server = SiteServer::new(config);
    let router = server.router();

    let response = send(&router, get("/api/search?q=../../etc/passwd", "198.51.100.51")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["message"], THREAT_REJECTION_MESSAGE);

    // Clean requests still pass.
    let response = send(&router, get("/health", "198.51.100.51")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unsupported_content_type_is_rejected() {
    let server = SiteServer::new(test_config());
    let router = server.router();

    let mut req = Request::builder()
        .method(Method::POST)
        .uri("/api/contact")
        .header(header::CONTENT_TYPE, "text/xml")
        .body(Body::from("<contact/>"))
        .unwrap();
    req.extensions_mut().insert(axum::extract::ConnectInfo(
        "198.51.100.60:41000".parse::<std::net::SocketAddr>().unwrap(),
    ));
    let response = send(&router, req).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(server.storage().contact_count(), 0);
}

#[tokio::test]
async fn test_lead_capture_body_cap() {
    let server = SiteServer::new(test_config());
    let router = server.router();

    let mut body = contact_body();
    body["message"] = json!("x".repeat(11 * 1024));
    let response = send(&router, post_json("/api/contact", "198.51.100.61", &body)).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let mut req = post_json("/api/contact", "198.51.100.61", &contact_body());
    req.headers_mut()
        .insert(header::CONTENT_LENGTH, "20000".parse().unwrap());
    let response = send(&router, req).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(server.storage().contact_count(), 0);
}

#[tokio::test]
async fn test_transport_limit_answers_carry_security_headers() {
    let mut config = test_config();
    config.listener.max_body_bytes = 4 * 1024;
    let server = SiteServer::new(config);
    let router = server.router();

    let body = json!({ "blob": "x".repeat(8 * 1024) });
    let response = send(&router, post_json("/api/unknown", "198.51.100.62", &body)).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(response.headers().contains_key("x-request-id"));
    assert!(response.headers().contains_key("content-security-policy"));
    assert!(response.headers().contains_key("strict-transport-security"));

    server.pipeline().registry().block(
        "198.51.100.63".parse().unwrap(),
        std::time::Duration::from_secs(60),
        "manual",
    );
    let response = send(&router, post_json("/api/unknown", "198.51.100.63", &body)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_multiline_form_body_passes_strict_scan() {
    let mut config = test_config();
    config.security.strict = true;
    let server = SiteServer::new(config);
    let router = server.router();

    let mut req = Request::builder()
        .method(Method::POST)
        .uri("/api/intake")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("name=Dana&message=First+line%0D%0ASecond+line"))
        .unwrap();
    req.extensions_mut().insert(axum::extract::ConnectInfo(
        "198.51.100.64:41000".parse::<std::net::SocketAddr>().unwrap(),
    ));
    let response = send(&router, req).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(server.events().count(EventKind::ThreatDetected), 0);
}

#[tokio::test]
async fn test_csp_reports_are_accepted_and_never_limited() {
    let server = SiteServer::new(test_config());
    let router = server.router();
    let report = json!({
        "csp-report": {
            "document-uri": "https://hvciso.com/",
            "violated-directive": "script-src-elem",
            "blocked-uri": "https://evil.example/x.js",
        }
    });

    for _ in 0..70 {
        let mut req = post_json("/api/csp-report", "198.51.100.70", &report);
        req.headers_mut()
            .insert(header::CONTENT_TYPE, "application/csp-report".parse().unwrap());
        let response = send(&router, req).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }
    assert_eq!(server.events().count(EventKind::CspViolation), 70);

    let mut req = request(Method::POST, "/api/csp-report", "198.51.100.70", None);
    req.headers_mut()
        .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
    let response = send(&router, req).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_security_headers_on_every_response() {
    let server = SiteServer::new(test_config());
    let router = server.router();

    let first = send(&router, get("/health", "198.51.100.80")).await;
    let second = send(&router, get("/health", "198.51.100.80")).await;
    assert_eq!(first.status(), StatusCode::OK);

    let headers = first.headers();
    let csp = headers[header::CONTENT_SECURITY_POLICY].to_str().unwrap();
    assert!(csp.contains("default-src 'self'"));
    assert!(csp.contains("'nonce-"));
    assert!(csp.contains("report-uri /api/csp-report"));
    assert!(headers.contains_key(header::STRICT_TRANSPORT_SECURITY));
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert!(headers.contains_key("permissions-policy"));
    assert!(headers.contains_key("x-request-id"));

    assert_ne!(first.headers()["x-request-id"], second.headers()["x-request-id"]);
    assert_ne!(
        first.headers()[header::CONTENT_SECURITY_POLICY],
        second.headers()[header::CONTENT_SECURITY_POLICY]
    );

    // API responses are never cached, rejections included.
    let response = send(&router, get("/api/unknown", "198.51.100.80")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let cache = response.headers()[header::CACHE_CONTROL].to_str().unwrap();
    assert!(cache.contains("no-store"));
    assert!(response.headers().contains_key("x-ratelimit-limit"));
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_forwarded_address_only_from_trusted_proxy() {
    let server = SiteServer::new(test_config());
    let router = server.router();
    let client = "203.0.113.90";
    server
        .pipeline()
        .registry()
        .block(client.parse().unwrap(), std::time::Duration::from_secs(60), "manual");

    let mut via_proxy = get("/health", "10.0.0.5");
    via_proxy
        .headers_mut()
        .insert("x-forwarded-for", format!("{client}, 10.0.0.7").parse().unwrap());
    let response = send(&router, via_proxy).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // A direct client cannot claim someone else's address.
    let mut spoofed = get("/health", "198.51.100.91");
    spoofed
        .headers_mut()
        .insert("x-forwarded-for", "203.0.113.1".parse().unwrap());
    let response = send(&router, spoofed).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut spoofed = get("/health", "203.0.113.91");
    spoofed
        .headers_mut()
        .insert("x-forwarded-for", "198.51.100.1".parse().unwrap());
    server
        .pipeline()
        .registry()
        .block("203.0.113.91".parse().unwrap(), std::time::Duration::from_secs(60), "manual");
    let response = send(&router, spoofed).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_requires_token() {
    let server = SiteServer::new(test_config());
    let router = server.router();

    let response = send(&router, get("/api/admin/status", "198.51.100.100")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut req = get("/api/admin/status", "198.51.100.100");
    req.headers_mut()
        .insert(header::AUTHORIZATION, "Bearer wrong-key".parse().unwrap());
    let response = send(&router, req).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&router, as_admin(get("/api/admin/status", "198.51.100.100"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "operational");
}

#[tokio::test]
async fn test_admin_block_and_unblock() {
    let server = SiteServer::new(test_config());
    let router = server.router();
    let operator = "198.51.100.110";
    let target = "203.0.113.111";

    let block = json!({ "ip": target, "durationSecs": 600, "reason": "scraping" });
    let response = send(&router, as_admin(post_json("/api/admin/block", operator, &block))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["success"], true);

    let response = send(&router, get("/health", target)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(&router, as_admin(get("/api/admin/blocked", operator))).await;
    let json = json_body(response).await;
    assert_eq!(json["temporary"][0]["ip"], target);
    assert_eq!(json["temporary"][0]["reason"], "scraping");

    let path = format!("/api/admin/block/{target}");
    let response = send(&router, as_admin(request(Method::DELETE, &path, operator, None))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&router, get("/health", target)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let bad = json!({ "ip": "not-an-address" });
    let response = send(&router, as_admin(post_json("/api/admin/block", operator, &bad))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_block_duration_is_bounded() {
    let server = SiteServer::new(test_config());
    let router = server.router();
    let operator = "198.51.100.112";
    let target = "203.0.113.5";

    let forever = json!({ "ip": target, "durationSecs": u64::MAX });
    let response =
        send(&router, as_admin(post_json("/api/admin/block", operator, &forever))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = send(&router, get("/health", target)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let longest = json!({ "ip": target, "durationSecs": MAX_BLOCK_DURATION.as_secs() });
    let response =
        send(&router, as_admin(post_json("/api/admin/block", operator, &longest))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = send(&router, get("/health", target)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_failed_contact_notification_still_saves() {
    let server = SiteServer::with_notifier(test_config(), Arc::new(FailingNotifier));
    let router = server.router();

    let response = send(&router, post_json("/api/contact", "198.51.100.140", &contact_body())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["emailSent"], false);
    assert_eq!(server.storage().contact_count(), 1);
}

#[tokio::test]
async fn test_failed_starter_kit_delivery_is_reported() {
    let server = SiteServer::with_notifier(test_config(), Arc::new(FailingNotifier));
    let router = server.router();

    let form = json!({ "email": "reader@example.com", "name": "Reader" });
    let response = send(&router, post_json("/api/starter-kit", "198.51.100.141", &form)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert_eq!(json, json!({ "success": false, "error": "Failed to send starter kit email" }));
}

#[tokio::test]
async fn test_admin_is_exempt_from_limits() {
    let server = SiteServer::new(test_config());
    let router = server.router();
    let body = contact_body();

    for _ in 0..8 {
        let response =
            send(&router, as_admin(post_json("/api/contact", "198.51.100.120", &body))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_form_validation_and_newsletter() {
    let server = SiteServer::new(test_config());
    let router = server.router();

    let response = send(
        &router,
        post_json("/api/contact", "198.51.100.130", &json!({ "name": "A" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    let fields: Vec<&str> = json["details"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["field"].as_str())
        .collect();
    assert_eq!(fields, ["name", "email", "serviceType", "message"]);

    let subscribe = json!({ "email": "Reader@Example.com" });
    for _ in 0..2 {
        let response =
            send(&router, post_json("/api/newsletter", "198.51.100.131", &subscribe)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(server.storage().subscriber_count(), 1);
}
