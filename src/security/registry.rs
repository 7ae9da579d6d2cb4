//! Allow/block registry with dynamic, time-bound blocking.
//!
//! # Rules
//! - Exempt (allowlisted address, admin identity, bypass key) skips limiting only
//! - Blocked (static blocklist or live dynamic entry) always rejects, even when exempt
//! - Expired dynamic entries are removed by the lookup that finds them
//! - Violations beyond `abuse_threshold` place one automatic block; while that
//!   block is live further violations neither extend nor replace it

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tokio::time::Instant;

use crate::config::SecurityConfig;
use crate::http::request::ClientContext;
use crate::observability::events::{EventKind, EventSink, SecurityEvent, Severity};
use crate::security::proxy::canonical;

/// Longest dynamic block. Longer requests are clamped to it.
pub const MAX_BLOCK_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Reason recorded for automatic blocks.
pub const ABUSE_BLOCK_REASON: &str = "Repeated rate limit violations";

/// A time-bound block placed at runtime.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub reason: String,
    pub expires_at: Instant,
}

/// Temporary block as exposed to operators.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryBlock {
    pub ip: String,
    pub reason: String,
    pub expires_in_secs: u64,
}

/// Current blocks, static and dynamic.
#[derive(Debug, Clone, Serialize)]
pub struct BlockedSnapshot {
    pub permanent: Vec<String>,
    pub temporary: Vec<TemporaryBlock>,
}

/// Process-wide allow/block state. Constructed once at startup and shared
/// through `Arc`.
pub struct AccessRegistry {
    allowlist: DashSet<IpAddr>,
    blocklist: DashSet<IpAddr>,
    dynamic: DashMap<IpAddr, BlockEntry>,
    violations: DashMap<IpAddr, u32>,
    bypass_keys: HashSet<String>,
    abuse_threshold: u32,
    abuse_block: Duration,
    events: Arc<dyn EventSink>,
}

fn parse_addrs(list: &[String]) -> impl Iterator<Item = IpAddr> + '_ {
    list.iter().filter_map(|entry| match entry.trim().parse::<IpAddr>() {
        Ok(ip) => Some(canonical(ip)),
        Err(_) => {
            tracing::warn!(entry = %entry, "Ignoring invalid address in allow/block list");
            None
        }
    })
}

impl AccessRegistry {
    pub fn from_config(config: &SecurityConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            allowlist: parse_addrs(&config.allowlist).collect(),
            blocklist: parse_addrs(&config.blocklist).collect(),
            dynamic: DashMap::new(),
            violations: DashMap::new(),
            bypass_keys: config.bypass_keys.iter().cloned().collect(),
            abuse_threshold: config.abuse_threshold,
            abuse_block: Duration::from_secs(config.abuse_block_secs),
            events,
        }
    }

    /// True when the request skips rate limiting.
    pub fn is_exempt(&self, ctx: &ClientContext) -> bool {
        if self.allowlist.contains(&canonical(ctx.addr)) {
            return true;
        }
        if ctx.identity.as_ref().is_some_and(|i| i.is_admin()) {
            return true;
        }
        ctx.api_key
            .as_ref()
            .is_some_and(|key| self.bypass_keys.contains(key))
    }

    pub fn is_blocked(&self, addr: IpAddr) -> bool {
        self.is_blocked_at(addr, Instant::now())
    }

    pub fn is_blocked_at(&self, addr: IpAddr, now: Instant) -> bool {
        let addr = canonical(addr);
        if self.blocklist.contains(&addr) {
            return true;
        }
        self.has_live_block(addr, now)
    }

    fn has_live_block(&self, addr: IpAddr, now: Instant) -> bool {
        if self
            .dynamic
            .remove_if(&addr, |_, entry| entry.expires_at <= now)
            .is_some()
        {
            tracing::debug!(address = %addr, "Dynamic block expired");
            return false;
        }
        self.dynamic.contains_key(&addr)
    }

    /// Block `addr` for `duration`, clamped to [`MAX_BLOCK_DURATION`].
    pub fn block(&self, addr: IpAddr, duration: Duration, reason: &str) {
        self.block_at(addr, duration, reason, Instant::now());
    }

    /// Insert or overwrite a dynamic block expiring `duration` after `now`.
    pub fn block_at(&self, addr: IpAddr, duration: Duration, reason: &str, now: Instant) {
        let addr = canonical(addr);
        let duration = duration.min(MAX_BLOCK_DURATION);
        let Some(expires_at) = now.checked_add(duration) else {
            tracing::error!(address = %addr, "Block expiry out of range, not blocking");
            return;
        };
        self.dynamic.insert(
            addr,
            BlockEntry {
                reason: reason.to_string(),
                expires_at,
            },
        );

        let expires_at_ms = SystemTime::now()
            .checked_add(duration)
            .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
            .unwrap_or_default()
            .as_millis() as u64;
        self.events.record(
            SecurityEvent::new(EventKind::AddressBlocked, Severity::Medium)
                .with_address(addr)
                .with_details(serde_json::json!({
                    "reason": reason,
                    "expiresInSecs": duration.as_secs(),
                    "expiresAtMs": expires_at_ms,
                })),
        );
    }

    /// Remove static and dynamic blocks and forget recorded violations.
    pub fn unblock(&self, addr: IpAddr) {
        let addr = canonical(addr);
        self.blocklist.remove(&addr);
        self.dynamic.remove(&addr);
        self.violations.remove(&addr);
        tracing::info!(address = %addr, "Address unblocked");
    }

    /// Exempt `addr` from rate limiting.
    pub fn allow(&self, addr: IpAddr) {
        self.allowlist.insert(canonical(addr));
        tracing::info!(address = %addr, "Address added to allowlist");
    }

    /// Undo [`allow`](Self::allow).
    pub fn disallow(&self, addr: IpAddr) {
        self.allowlist.remove(&canonical(addr));
        tracing::info!(address = %addr, "Address removed from allowlist");
    }

    /// Add to the static blocklist. Only [`unblock`](Self::unblock) removes it.
    pub fn deny(&self, addr: IpAddr) {
        self.blocklist.insert(canonical(addr));
        tracing::info!(address = %addr, "Address added to blocklist");
    }

    pub fn record_violation(&self, addr: IpAddr) -> bool {
        self.record_violation_at(addr, Instant::now())
    }

    /// Count a rate-limit violation. Returns true when this violation placed
    /// an automatic block.
    pub fn record_violation_at(&self, addr: IpAddr, now: Instant) -> bool {
        let addr = canonical(addr);
        let count = {
            let mut entry = self.violations.entry(addr).or_insert(0);
            *entry += 1;
            *entry
        };
        if count <= self.abuse_threshold || self.has_live_block(addr, now) {
            return false;
        }

        self.violations.remove(&addr);
        self.block_at(addr, self.abuse_block, ABUSE_BLOCK_REASON, now);
        true
    }

    /// Violations recorded since the last automatic block or unblock.
    pub fn violations(&self, addr: IpAddr) -> u32 {
        self.violations
            .get(&canonical(addr))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// Drop expired dynamic blocks. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.dynamic.len();
        self.dynamic.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.dynamic.len())
    }

    pub fn snapshot(&self) -> BlockedSnapshot {
        let now = Instant::now();
        let mut permanent: Vec<String> = self.blocklist.iter().map(|ip| ip.to_string()).collect();
        permanent.sort();
        let mut temporary: Vec<TemporaryBlock> = self
            .dynamic
            .iter()
            .filter(|e| e.expires_at > now)
            .map(|e| TemporaryBlock {
                ip: e.key().to_string(),
                reason: e.reason.clone(),
                expires_in_secs: e.expires_at.saturating_duration_since(now).as_secs(),
            })
            .collect();
        temporary.sort_by(|a, b| a.ip.cmp(&b.ip));
        BlockedSnapshot {
            permanent,
            temporary,
        }
    }
}
