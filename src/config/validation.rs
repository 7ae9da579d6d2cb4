//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, ceilings > 0, delay caps)
//! - Check every configured address and proxy range parses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SiteConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use crate::config::schema::{SiteConfig, PLACEHOLDER_ADMIN_KEY};
use crate::security::proxy::parse_proxy_entry;
use crate::security::registry::MAX_BLOCK_DURATION;
use crate::security::store::MAX_WINDOW;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate the whole configuration, collecting every error.
pub fn validate_config(config: &SiteConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be > 0"));
    }

    let security = &config.security;
    for (field, list) in [
        ("security.allowlist", &security.allowlist),
        ("security.blocklist", &security.blocklist),
    ] {
        for entry in list {
            if entry.parse::<IpAddr>().is_err() {
                errors.push(ValidationError::new(field, format!("'{entry}' is not an IP address")));
            }
        }
    }
    for entry in &security.trusted_proxies {
        if parse_proxy_entry(entry).is_none() {
            errors.push(ValidationError::new(
                "security.trusted_proxies",
                format!("'{entry}' is neither an IP address nor a CIDR range"),
            ));
        }
    }
    let report_uri = &config.csp.report_uri;
    if !(report_uri.starts_with('/') || report_uri.starts_with("https://") || report_uri.starts_with("http://"))
        || report_uri.contains(char::is_whitespace)
    {
        errors.push(ValidationError::new(
            "csp.report_uri",
            format!("'{report_uri}' must be a path or an http(s) URL"),
        ));
    }
    if security.abuse_threshold == 0 {
        errors.push(ValidationError::new("security.abuse_threshold", "must be > 0"));
    }
    if security.abuse_block_secs == 0 || security.abuse_block_secs > MAX_BLOCK_DURATION.as_secs() {
        errors.push(ValidationError::new(
            "security.abuse_block_secs",
            format!("must be between 1 and {}", MAX_BLOCK_DURATION.as_secs()),
        ));
    }
    let max_window_ms = MAX_WINDOW.as_millis() as u64;

    let mut names = HashSet::new();
    for (i, limiter) in config.rate_limit.limiters.iter().enumerate() {
        let field = format!("rate_limit.limiters[{i}]");
        if !names.insert(limiter.name.as_str()) {
            errors.push(ValidationError::new(
                &field,
                format!("duplicate limiter name '{}'", limiter.name),
            ));
        }
        if limiter.window_ms == 0 || limiter.window_ms > max_window_ms {
            errors.push(ValidationError::new(
                &field,
                format!("window_ms must be between 1 and {max_window_ms}"),
            ));
        }
        if limiter.max == 0 {
            errors.push(ValidationError::new(&field, "max must be > 0"));
        }
        if limiter.paths.is_empty() {
            errors.push(ValidationError::new(&field, "at least one path prefix is required"));
        }
    }

    let slowdown = &config.rate_limit.slowdown;
    if slowdown.enabled {
        if slowdown.window_ms == 0 || slowdown.window_ms > max_window_ms {
            errors.push(ValidationError::new(
                "rate_limit.slowdown.window_ms",
                format!("must be between 1 and {max_window_ms}"),
            ));
        }
        if slowdown.max_delay_ms < slowdown.delay_ms {
            errors.push(ValidationError::new(
                "rate_limit.slowdown.max_delay_ms",
                "must be >= delay_ms",
            ));
        }
        if slowdown.max_delay_ms / 1000 >= config.listener.request_timeout_secs {
            errors.push(ValidationError::new(
                "rate_limit.slowdown.max_delay_ms",
                "must be shorter than the request timeout",
            ));
        }
    }

    if config.admin.enabled
        && (config.admin.api_key.trim().is_empty() || config.admin.api_key == PLACEHOLDER_ADMIN_KEY)
    {
        errors.push(ValidationError::new(
            "admin.api_key",
            "must be set to a real secret when the admin API is enabled",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "is not a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&SiteConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = SiteConfig::default();
        config.security.allowlist.push("not-an-ip".into());
        config.security.trusted_proxies.push("10.0.0.0/99".into());
        config.rate_limit.limiters[0].max = 0;
        config.rate_limit.limiters[1].name = config.rate_limit.limiters[0].name.clone();
        config.admin.enabled = true;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"security.allowlist"));
        assert!(fields.contains(&"security.trusted_proxies"));
        assert!(fields.contains(&"rate_limit.limiters[0]"));
        assert!(fields.contains(&"rate_limit.limiters[1]"));
        assert!(fields.contains(&"admin.api_key"));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let mut config = SiteConfig::default();
        config.security.abuse_block_secs = u64::MAX;
        config.rate_limit.limiters[0].window_ms = u64::MAX;
        config.rate_limit.slowdown.window_ms = MAX_WINDOW.as_millis() as u64 + 1;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"security.abuse_block_secs"));
        assert!(fields.contains(&"rate_limit.limiters[0]"));
        assert!(fields.contains(&"rate_limit.slowdown.window_ms"));
    }

    #[test]
    fn test_delay_cap_below_base_rejected() {
        let mut config = SiteConfig::default();
        config.rate_limit.slowdown.delay_ms = 1000;
        config.rate_limit.slowdown.max_delay_ms = 500;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "rate_limit.slowdown.max_delay_ms");
    }
}
