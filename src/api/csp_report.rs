//! Browser CSP violation reports.
//!
//! Accepts both the legacy `application/csp-report` shape
//! (`{"csp-report": {...}}`) and Reporting API batches
//! (`[{"type": "csp-violation", "body": {...}}]`). Always answers 204.

use axum::{body::Bytes, extract::State, http::StatusCode};
use serde_json::Value;

use crate::api::ApiState;
use crate::observability::events::{EventKind, SecurityEvent, Severity};
use crate::observability::metrics;

/// Violation bodies found in a report payload.
pub fn violations(payload: &Value) -> Vec<Value> {
    match payload {
        Value::Object(map) => map
            .get("csp-report")
            .cloned()
            .into_iter()
            .collect(),
        Value::Array(reports) => reports
            .iter()
            .filter(|r| r.get("type").and_then(Value::as_str) == Some("csp-violation"))
            .filter_map(|r| r.get("body").cloned())
            .collect(),
        _ => Vec::new(),
    }
}

pub async fn receive_csp_report(State(state): State<ApiState>, body: Bytes) -> StatusCode {
    let payload = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::debug!(error = %err, bytes = body.len(), "Discarding malformed CSP report");
            return StatusCode::NO_CONTENT;
        }
    };

    for violation in violations(&payload) {
        metrics::record_csp_violation();
        state.events.record(
            SecurityEvent::new(EventKind::CspViolation, Severity::Low).with_details(violation),
        );
    }
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_report() {
        let payload = json!({ "csp-report": { "violated-directive": "script-src" } });
        let found = violations(&payload);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["violated-directive"], "script-src");
    }

    #[test]
    fn test_reporting_api_batch() {
        let payload = json!([
            { "type": "csp-violation", "body": { "effectiveDirective": "img-src" } },
            { "type": "deprecation", "body": {} },
        ]);
        assert_eq!(violations(&payload).len(), 1);
    }

    #[test]
    fn test_unrecognized_shape() {
        assert!(violations(&json!({ "something": 1 })).is_empty());
        assert!(violations(&json!("text")).is_empty());
    }
}
