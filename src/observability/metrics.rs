//! Metrics collection and exposition.
//!
//! # Metrics
//! - `site_requests_total` (counter): requests by status
//! - `site_request_duration_seconds` (histogram): latency distribution
//! - `site_rate_limited_total` (counter): 429s by limiter
//! - `site_blocked_requests_total` (counter): 403s from the block check
//! - `site_threats_detected_total` (counter): threat-scan matches by pattern
//! - `site_csp_violations_total` (counter): browser CSP reports received
//!
//! [`RateLimitMonitor`] keeps an in-process view of the same traffic for the
//! admin API, independent of whether the Prometheus exporter is running.

use std::collections::HashMap;
use std::hash::Hash;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(status: u16, start: Instant) {
    counter!("site_requests_total", "status" => status.to_string()).increment(1);
    histogram!("site_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(limiter: &str) {
    counter!("site_rate_limited_total", "limiter" => limiter.to_string()).increment(1);
}

pub fn record_blocked() {
    counter!("site_blocked_requests_total").increment(1);
}

pub fn record_threat(pattern: &str) {
    counter!("site_threats_detected_total", "pattern" => pattern.to_string()).increment(1);
}

pub fn record_csp_violation() {
    counter!("site_csp_violations_total").increment(1);
}

#[derive(Default)]
struct MonitorCounts {
    total: u64,
    blocked: u64,
    allowed: u64,
    by_endpoint: HashMap<String, u64>,
    by_address: HashMap<IpAddr, u64>,
}

/// Point-in-time view of [`RateLimitMonitor`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub allowed_requests: u64,
    /// Percentage of requests answered with 429.
    pub block_rate: f64,
    pub top_endpoints: Vec<(String, u64)>,
    pub top_addresses: Vec<(String, u64)>,
}

/// In-process request accounting. A request counts as blocked when it was
/// answered with 429.
#[derive(Default)]
pub struct RateLimitMonitor {
    counts: Mutex<MonitorCounts>,
}

const TOP_N: usize = 10;

/// Entries kept per breakdown map. When full, the least-hit entries are dropped.
pub const MAX_TRACKED: usize = 1000;

/// Endpoint label for requests no route answered.
pub const UNMATCHED_ENDPOINT: &str = "(unmatched)";

fn bump<K: Eq + Hash>(map: &mut HashMap<K, u64>, key: K) {
    if map.len() >= MAX_TRACKED && !map.contains_key(&key) {
        trim(map);
    }
    *map.entry(key).or_insert(0) += 1;
}

/// Drop every entry not strictly busier than the smallest of the top half.
fn trim<K: Eq + Hash>(map: &mut HashMap<K, u64>) {
    let mut counts: Vec<u64> = map.values().copied().collect();
    counts.sort_unstable_by(|a, b| b.cmp(a));
    let floor = counts[(MAX_TRACKED / 2).min(counts.len()) - 1];
    map.retain(|_, count| *count > floor);
}

impl RateLimitMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, path: &str, addr: IpAddr, blocked: bool) {
        let mut counts = self.counts.lock().expect("monitor mutex poisoned");
        counts.total += 1;
        if blocked {
            counts.blocked += 1;
        } else {
            counts.allowed += 1;
        }
        bump(&mut counts.by_endpoint, path.to_string());
        bump(&mut counts.by_address, addr);
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let counts = self.counts.lock().expect("monitor mutex poisoned");
        let block_rate = if counts.total > 0 {
            counts.blocked as f64 / counts.total as f64 * 100.0
        } else {
            0.0
        };
        MonitorSnapshot {
            total_requests: counts.total,
            blocked_requests: counts.blocked,
            allowed_requests: counts.allowed,
            block_rate,
            top_endpoints: top(counts.by_endpoint.iter().map(|(k, v)| (k.clone(), *v))),
            top_addresses: top(counts.by_address.iter().map(|(k, v)| (k.to_string(), *v))),
        }
    }

    pub fn reset(&self) {
        *self.counts.lock().expect("monitor mutex poisoned") = MonitorCounts::default();
    }
}

fn top(entries: impl Iterator<Item = (String, u64)>) -> Vec<(String, u64)> {
    let mut entries: Vec<_> = entries.collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(TOP_N);
    entries
}
