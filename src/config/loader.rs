//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{Environment, SiteConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: the TOML file when given (defaults otherwise), then
/// process environment overrides, then validation.
pub fn load_config(path: Option<&Path>) -> Result<SiteConfig, ConfigError> {
    let config = match path {
        Some(path) => parse_config(&fs::read_to_string(path)?)?,
        None => SiteConfig::default(),
    };
    let config = apply_env(config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Parse a TOML document without validating it.
pub fn parse_config(content: &str) -> Result<SiteConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Apply environment-style overrides. `lookup` returns the value of a variable.
pub fn apply_env<F>(mut config: SiteConfig, lookup: F) -> SiteConfig
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(env) = lookup("SITE_ENV") {
        config.environment = match env.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            _ => Environment::Production,
        };
    }
    if let Some(port) = lookup("PORT").and_then(|p| p.trim().parse::<u16>().ok()) {
        let host = config
            .listener
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.listener.bind_address = format!("{host}:{port}");
    }
    if let Some(level) = lookup("LOG_LEVEL") {
        config.observability.log_level = level;
    }
    if let Some(list) = lookup("RATE_LIMIT_ALLOWLIST") {
        config.security.allowlist = split_list(&list);
    }
    if let Some(list) = lookup("RATE_LIMIT_BLOCKLIST") {
        config.security.blocklist = split_list(&list);
    }
    if let Some(list) = lookup("RATE_LIMIT_BYPASS_KEYS") {
        config.security.bypass_keys = split_list(&list);
    }
    if let Some(list) = lookup("TRUSTED_PROXIES") {
        config.security.trusted_proxies = split_list(&list);
    }
    if let Some(flag) = lookup("STRICT_SECURITY") {
        config.security.strict = flag.trim() == "true";
    }
    if let Some(uri) = lookup("CSP_REPORT_URI") {
        config.csp.report_uri = uri;
    }
    if let Some(flag) = lookup("CSP_REPORT_ONLY") {
        config.csp.report_only = flag.trim() == "true";
    }
    if let Some(url) = lookup("REDIS_URL") {
        config.rate_limit.redis_url = Some(url).filter(|u| !u.trim().is_empty());
    }
    if let Some(key) = lookup("ADMIN_API_KEY") {
        config.admin.enabled = true;
        config.admin.api_key = key;
    }
    if let Some(list) = lookup("ALLOWED_ORIGINS") {
        config.cors.allowed_origins = split_list(&list);
    }
    config
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
