//! Security response headers.
//!
//! # Responsibilities
//! - Content-Security-Policy with optional per-request nonce
//! - Permissions-Policy feature gates
//! - Fixed hardening headers, plus cache suppression on API paths
//!
//! # Design Decisions
//! - Output depends only on (path, nonce, environment); the nonce is generated by the caller
//! - Third-party origins are merged into their directives in every environment
//! - Development relaxes script/style for the live-reloading dev server

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use base64::Engine;
use rand::RngCore;

use crate::config::{CspConfig, Environment};

const SCHEDULING: [&str; 2] = ["https://calendly.com", "https://assets.calendly.com"];
const ANALYTICS: [&str; 2] = [
    "https://www.google-analytics.com",
    "https://www.googletagmanager.com",
];
const DEV_HTTP: [&str; 2] = ["http://localhost:*", "http://127.0.0.1:*"];
const DEV_WS: [&str; 2] = ["ws://localhost:*", "ws://127.0.0.1:*"];
const DEV_WSS: [&str; 2] = ["wss://localhost:*", "wss://127.0.0.1:*"];

const DENIED_FEATURES: &[&str] = &[
    "accelerometer",
    "ambient-light-sensor",
    "battery",
    "camera",
    "display-capture",
    "document-domain",
    "geolocation",
    "gyroscope",
    "magnetometer",
    "microphone",
    "midi",
    "payment",
    "publickey-credentials-get",
    "screen-wake-lock",
    "speaker-selection",
    "sync-xhr",
    "usb",
    "web-share",
    "xr-spatial-tracking",
];

const SELF_FEATURES: &[&str] = &["autoplay", "encrypted-media", "fullscreen", "picture-in-picture"];

const HARDENING: &[(&str, &str)] = &[
    ("x-frame-options", "DENY"),
    ("x-content-type-options", "nosniff"),
    ("x-xss-protection", "0"),
    ("x-download-options", "noopen"),
    ("x-permitted-cross-domain-policies", "none"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("x-dns-prefetch-control", "off"),
    ("cross-origin-embedder-policy", "require-corp"),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
];

const NO_CACHE: &[(&str, &str)] = &[
    ("cache-control", "no-store, no-cache, must-revalidate, proxy-revalidate"),
    ("pragma", "no-cache"),
    ("expires", "0"),
    ("surrogate-control", "no-store"),
];

const HSTS: &str = "max-age=31536000; includeSubDomains; preload";

/// Random 16-byte nonce, base64 encoded.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[derive(Debug, Clone)]
pub struct SecurityHeaderComposer {
    development: bool,
    nonce_enabled: bool,
    report_only: bool,
    report_uri: String,
    permissions_policy: HeaderValue,
}

impl SecurityHeaderComposer {
    pub fn new(csp: &CspConfig, environment: Environment) -> Self {
        let permissions_policy = DENIED_FEATURES
            .iter()
            .map(|f| format!("{f}=()"))
            .chain(SELF_FEATURES.iter().map(|f| format!("{f}=(self)")))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            development: environment.is_development(),
            nonce_enabled: csp.nonce,
            report_only: csp.report_only,
            report_uri: csp.report_uri.clone(),
            permissions_policy: HeaderValue::from_str(&permissions_policy)
                .unwrap_or_else(|_| HeaderValue::from_static("camera=()")),
        }
    }

    pub fn nonce_enabled(&self) -> bool {
        self.nonce_enabled
    }

    pub fn report_uri(&self) -> &str {
        &self.report_uri
    }

    /// The Content-Security-Policy value for `nonce`.
    pub fn content_security_policy(&self, nonce: Option<&str>) -> String {
        let dev = self.development;
        let nonce_src = nonce.map(|n| format!("'nonce-{n}'"));

        let mut script_src = vec!["'self'".to_string()];
        script_src.extend(nonce_src.clone());
        if dev {
            script_src.extend(["'unsafe-inline'", "'unsafe-eval'"].map(String::from));
            script_src.extend([DEV_HTTP[0], DEV_WS[0], DEV_HTTP[1], DEV_WS[1]].map(String::from));
        } else {
            script_src.push("'strict-dynamic'".into());
        }
        script_src.extend(SCHEDULING.map(String::from));
        script_src.extend(ANALYTICS.map(String::from));
        script_src.extend(["https://cdn.jsdelivr.net", "https://replit.com"].map(String::from));

        let mut style_src = vec!["'self'".to_string()];
        if dev {
            style_src.push("'unsafe-inline'".into());
        } else {
            style_src.extend(nonce_src);
        }
        style_src.push("https://fonts.googleapis.com".into());
        style_src.extend(SCHEDULING.map(String::from));

        let mut connect_src: Vec<String> = vec![
            "'self'",
            "https://calendly.com",
            "https://api.calendly.com",
            ANALYTICS[0],
            "https://analytics.google.com",
            ANALYTICS[1],
        ]
        .into_iter()
        .map(String::from)
        .collect();
        if dev {
            for i in 0..2 {
                connect_src.extend([DEV_WS[i], DEV_WSS[i], DEV_HTTP[i]].map(String::from));
            }
        }

        let fixed = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        let mut img_src = fixed(&["'self'", "data:", "blob:", "https:", "https://images.unsplash.com"]);
        img_src.extend(ANALYTICS.map(String::from));

        let directives: Vec<(&str, Vec<String>)> = vec![
            ("default-src", fixed(&["'self'"])),
            ("script-src", script_src),
            ("style-src", style_src),
            ("img-src", img_src),
            ("font-src", fixed(&["'self'", "https://fonts.gstatic.com", "data:"])),
            ("connect-src", connect_src),
            ("media-src", fixed(&["'self'", "blob:"])),
            ("object-src", fixed(&["'none'"])),
            ("child-src", fixed(&["'self'", "https://calendly.com", "blob:"])),
            ("frame-src", fixed(&["'self'", "https://calendly.com"])),
            ("frame-ancestors", fixed(&["'self'"])),
            ("form-action", fixed(&["'self'", "https://calendly.com"])),
            ("base-uri", fixed(&["'self'"])),
            ("manifest-src", fixed(&["'self'"])),
            ("worker-src", fixed(&["'self'", "blob:"])),
            ("report-uri", vec![self.report_uri.clone()]),
        ];

        let mut policy = directives
            .into_iter()
            .map(|(name, values)| format!("{name} {}", values.join(" ")))
            .collect::<Vec<_>>()
            .join("; ");
        if !dev {
            policy.push_str("; upgrade-insecure-requests");
        }
        policy
    }

    /// All security headers for a response to `path`.
    pub fn compose(&self, path: &str, nonce: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();

        let csp_name = if self.report_only {
            "content-security-policy-report-only"
        } else {
            "content-security-policy"
        };
        if let Ok(value) = HeaderValue::from_str(&self.content_security_policy(nonce)) {
            headers.insert(HeaderName::from_static(csp_name), value);
        }
        headers.insert(
            HeaderName::from_static("permissions-policy"),
            self.permissions_policy.clone(),
        );

        for (name, value) in HARDENING {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        if !self.development {
            headers.insert(
                HeaderName::from_static("strict-transport-security"),
                HeaderValue::from_static(HSTS),
            );
        }
        if path.starts_with("/api/") {
            for (name, value) in NO_CACHE {
                headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
            }
        }
        headers
    }
}
