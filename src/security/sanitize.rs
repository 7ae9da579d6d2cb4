//! Request sanitization before threat scanning and limiting.

use axum::http::{header, HeaderMap, Method};

use crate::config::SecurityConfig;
use crate::http::response::ApiError;

/// Forwarding headers dropped when the peer is not a trusted proxy.
pub const FORWARDING_HEADERS: [&str; 3] = ["x-forwarded-host", "x-forwarded-proto", "x-forwarded-for"];

/// Content types accepted on mutating requests.
const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/json",
    "application/x-www-form-urlencoded",
    "multipart/form-data",
    "application/csp-report",
    "application/reports+json",
];

#[derive(Debug, Clone)]
pub struct RequestSanitizer {
    lead_capture_paths: Vec<String>,
    lead_capture_max_bytes: usize,
}

impl RequestSanitizer {
    pub fn from_config(config: &SecurityConfig) -> Self {
        Self {
            lead_capture_paths: config.lead_capture_paths.clone(),
            lead_capture_max_bytes: config.lead_capture_max_bytes,
        }
    }

    /// Remove forwarding headers supplied by an untrusted peer.
    pub fn strip_forwarding(&self, headers: &mut HeaderMap, peer_trusted: bool) {
        if peer_trusted {
            return;
        }
        for name in FORWARDING_HEADERS {
            headers.remove(name);
        }
    }

    /// Mutating methods must declare an allowed Content-Type. Bodiless
    /// requests (no Content-Type, zero length) are let through.
    pub fn check_content_type(&self, method: &Method, headers: &HeaderMap) -> Result<(), ApiError> {
        if !matches!(*method, Method::POST | Method::PUT | Method::PATCH) {
            return Ok(());
        }
        let Some(value) = headers.get(header::CONTENT_TYPE) else {
            let empty = headers
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .is_none_or(|v| v.trim() == "0");
            return if empty {
                Ok(())
            } else {
                Err(ApiError::UnsupportedMediaType)
            };
        };

        let mime = value
            .to_str()
            .unwrap_or_default()
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if ALLOWED_CONTENT_TYPES.contains(&mime.as_str()) {
            Ok(())
        } else {
            Err(ApiError::UnsupportedMediaType)
        }
    }

    pub fn is_lead_capture(&self, path: &str) -> bool {
        self.lead_capture_paths.iter().any(|p| path.starts_with(p.as_str()))
    }

    pub fn lead_capture_max_bytes(&self) -> usize {
        self.lead_capture_max_bytes
    }

    /// Reject a declared Content-Length above the lead-capture limit without
    /// reading the body.
    pub fn check_declared_length(&self, path: &str, headers: &HeaderMap) -> Result<(), ApiError> {
        if !self.is_lead_capture(path) {
            return Ok(());
        }
        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<usize>().ok());
        match declared {
            Some(len) if len > self.lead_capture_max_bytes => Err(ApiError::PayloadTooLarge),
            _ => Ok(()),
        }
    }
}
