//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the site.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Placeholder admin key shipped in the defaults. Validation rejects it when
/// the admin API is enabled.
pub const PLACEHOLDER_ADMIN_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

/// Root configuration for the site server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SiteConfig {
    /// Runtime environment (controls CSP strictness and log format).
    pub environment: Environment,

    /// Listener configuration (bind address, body limit, timeout).
    pub listener: ListenerConfig,

    /// Request-defense settings (allow/block lists, proxies, threat scan).
    pub security: SecurityConfig,

    /// Content-Security-Policy settings.
    pub csp: CspConfig,

    /// Rate limiting and progressive delay.
    pub rate_limit: RateLimitConfig,

    /// Cross-origin settings.
    pub cors: CorsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Directory of the built static site, served as the router fallback.
    pub static_dir: Option<String>,
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:5000").
    pub bind_address: String,

    /// Request timeout in seconds. Must exceed the maximum progressive delay.
    pub request_timeout_secs: u64,

    /// Global request body cap in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Request-defense configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Reject requests matching a threat pattern instead of only logging them.
    pub strict: bool,

    /// Proxies whose forwarding headers are honored (IPs or CIDR ranges).
    pub trusted_proxies: Vec<String>,

    /// Addresses exempt from rate limiting.
    pub allowlist: Vec<String>,

    /// Addresses rejected outright.
    pub blocklist: Vec<String>,

    /// `X-API-Key` values that bypass rate limiting.
    pub bypass_keys: Vec<String>,

    /// Path prefixes of lead-capture endpoints (small body cap).
    pub lead_capture_paths: Vec<String>,

    /// Body cap in bytes for lead-capture endpoints.
    pub lead_capture_max_bytes: usize,

    /// Violations after which an address is blocked automatically.
    pub abuse_threshold: u32,

    /// Duration of an automatic block in seconds.
    pub abuse_block_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            strict: false,
            trusted_proxies: vec![
                "127.0.0.1".to_string(),
                "::1".to_string(),
                "10.0.0.0/8".to_string(),
                "172.16.0.0/12".to_string(),
                "192.168.0.0/16".to_string(),
            ],
            allowlist: Vec::new(),
            blocklist: Vec::new(),
            bypass_keys: Vec::new(),
            lead_capture_paths: vec![
                "/api/contact".to_string(),
                "/api/newsletter".to_string(),
                "/api/starter-kit".to_string(),
            ],
            lead_capture_max_bytes: 10 * 1024,
            abuse_threshold: 10,
            abuse_block_secs: 3600,
        }
    }
}

/// Content-Security-Policy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CspConfig {
    /// Generate a fresh nonce per request.
    pub nonce: bool,

    /// Emit `Content-Security-Policy-Report-Only` instead of enforcing.
    pub report_only: bool,

    /// Where browsers post violation reports. Also the path of the local
    /// reporting endpoint when it is relative.
    pub report_uri: String,
}

impl Default for CspConfig {
    fn default() -> Self {
        Self {
            nonce: true,
            report_only: false,
            report_uri: "/api/csp-report".to_string(),
        }
    }
}

/// Limiter algorithm.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LimiterKind {
    Fixed,
    Sliding,
}

/// A named rate-limit policy bound to one or more path prefixes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimiterConfig {
    /// Policy name for logs and metrics.
    pub name: String,

    pub kind: LimiterKind,

    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Requests allowed per window.
    pub max: u64,

    /// Message returned with a 429.
    #[serde(default = "default_limit_message")]
    pub message: String,

    /// Do not count requests that end with a status below 400.
    #[serde(default)]
    pub skip_successful: bool,

    /// Do not count requests that end with a status of 400 or above.
    #[serde(default)]
    pub skip_failed: bool,

    /// Path prefixes this policy applies to.
    pub paths: Vec<String>,
}

fn default_limit_message() -> String {
    "Too many requests, please try again later.".to_string()
}

impl LimiterConfig {
    fn fixed(name: &str, window_ms: u64, max: u64, message: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: LimiterKind::Fixed,
            window_ms,
            max,
            message: message.to_string(),
            skip_successful: false,
            skip_failed: false,
            paths: vec![path.to_string()],
        }
    }
}

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Default route-family policies, most specific first.
pub fn default_limiters() -> Vec<LimiterConfig> {
    vec![
        LimiterConfig {
            skip_successful: true,
            ..LimiterConfig::fixed(
                "auth",
                15 * MINUTE_MS,
                5,
                "Too many authentication attempts. Please try again later.",
                "/api/admin/",
            )
        },
        LimiterConfig::fixed(
            "contact",
            15 * MINUTE_MS,
            5,
            "Too many contact form submissions. Please try again in 15 minutes.",
            "/api/contact",
        ),
        LimiterConfig::fixed(
            "newsletter",
            HOUR_MS,
            3,
            "Too many subscription attempts. Please try again later.",
            "/api/newsletter",
        ),
        LimiterConfig::fixed(
            "starter_kit",
            24 * HOUR_MS,
            2,
            "Daily download limit reached. Please try again tomorrow.",
            "/api/starter-kit",
        ),
        LimiterConfig::fixed(
            "upload",
            HOUR_MS,
            10,
            "Upload limit reached. Please try again later.",
            "/api/upload",
        ),
        LimiterConfig {
            kind: LimiterKind::Sliding,
            ..LimiterConfig::fixed(
                "api",
                MINUTE_MS,
                60,
                "API rate limit exceeded. Please slow down your requests.",
                "/api/",
            )
        },
    ]
}

/// Progressive delay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SlowdownConfig {
    pub enabled: bool,

    /// Counting window in milliseconds.
    pub window_ms: u64,

    /// Counted requests allowed before delays start.
    pub delay_after: u64,

    /// Delay added per counted request beyond `delay_after`.
    pub delay_ms: u64,

    /// Upper bound on a single delay.
    pub max_delay_ms: u64,
}

impl Default for SlowdownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 15 * MINUTE_MS,
            delay_after: 50,
            delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Shared counter backend. In-memory when unset.
    pub redis_url: Option<String>,

    /// Named policies, checked in order.
    pub limiters: Vec<LimiterConfig>,

    pub slowdown: SlowdownConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            limiters: default_limiters(),
            slowdown: SlowdownConfig::default(),
        }
    }
}

/// Cross-origin configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins allowed to call the API with credentials.
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "https://hudsonvalleyciso.com".to_string(),
                "https://www.hudsonvalleyciso.com".to_string(),
                "https://hvciso.com".to_string(),
                "https://www.hvciso.com".to_string(),
            ],
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log directive (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format. Derived from the environment when unset.
    pub log_format: Option<LogFormat>,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Prometheus endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: None,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin API under `/api/admin`.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_ADMIN_KEY.to_string(),
        }
    }
}
