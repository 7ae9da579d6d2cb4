//! Handlers mounted under `/api/admin`.

use std::net::IpAddr;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::http::response::ApiError;
use crate::observability::{MonitorSnapshot, SecurityEvent};
use crate::security::registry::{BlockedSnapshot, MAX_BLOCK_DURATION};

const DEFAULT_BLOCK_SECS: u64 = 3600;
const DEFAULT_EVENT_COUNT: usize = 100;
const MAX_EVENT_COUNT: usize = 1000;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub permanent_blocks: usize,
    pub temporary_blocks: usize,
    pub total_requests: u64,
}

#[derive(Serialize)]
pub struct Ack {
    pub success: bool,
    pub ip: Option<String>,
}

impl Ack {
    fn ok(ip: Option<IpAddr>) -> Json<Self> {
        Json(Self {
            success: true,
            ip: ip.map(|ip| ip.to_string()),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRequest {
    pub ip: String,
    pub duration_secs: Option<u64>,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct AddressRequest {
    pub ip: String,
}

#[derive(Deserialize)]
pub struct EventsQuery {
    pub count: Option<usize>,
}

fn parse_ip(raw: &str) -> Result<IpAddr, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid IP address: {raw}")))
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let blocked = state.pipeline.registry().snapshot();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        permanent_blocks: blocked.permanent.len(),
        temporary_blocks: blocked.temporary.len(),
        total_requests: state.pipeline.monitor().snapshot().total_requests,
    })
}

pub async fn get_metrics(State(state): State<AdminState>) -> Json<MonitorSnapshot> {
    Json(state.pipeline.monitor().snapshot())
}

pub async fn reset_metrics(State(state): State<AdminState>) -> Json<Ack> {
    state.pipeline.monitor().reset();
    tracing::info!("Rate limit monitor reset");
    Ack::ok(None)
}

pub async fn get_blocked(State(state): State<AdminState>) -> Json<BlockedSnapshot> {
    Json(state.pipeline.registry().snapshot())
}

pub async fn block_address(
    State(state): State<AdminState>,
    Json(body): Json<BlockRequest>,
) -> Result<Json<Ack>, ApiError> {
    let ip = parse_ip(&body.ip)?;
    let secs = body.duration_secs.unwrap_or(DEFAULT_BLOCK_SECS).max(1);
    if secs > MAX_BLOCK_DURATION.as_secs() {
        return Err(ApiError::BadRequest(format!(
            "durationSecs must not exceed {}",
            MAX_BLOCK_DURATION.as_secs()
        )));
    }
    let duration = Duration::from_secs(secs);
    let reason = body.reason.unwrap_or_else(|| "Manual block".to_string());
    state.pipeline.registry().block(ip, duration, &reason);
    Ok(Ack::ok(Some(ip)))
}

pub async fn unblock_address(
    State(state): State<AdminState>,
    Path(ip): Path<String>,
) -> Result<Json<Ack>, ApiError> {
    let ip = parse_ip(&ip)?;
    state.pipeline.registry().unblock(ip);
    Ok(Ack::ok(Some(ip)))
}

pub async fn allow_address(
    State(state): State<AdminState>,
    Json(body): Json<AddressRequest>,
) -> Result<Json<Ack>, ApiError> {
    let ip = parse_ip(&body.ip)?;
    state.pipeline.registry().allow(ip);
    Ok(Ack::ok(Some(ip)))
}

pub async fn disallow_address(
    State(state): State<AdminState>,
    Path(ip): Path<String>,
) -> Result<Json<Ack>, ApiError> {
    let ip = parse_ip(&ip)?;
    state.pipeline.registry().disallow(ip);
    Ok(Ack::ok(Some(ip)))
}

pub async fn deny_address(
    State(state): State<AdminState>,
    Json(body): Json<AddressRequest>,
) -> Result<Json<Ack>, ApiError> {
    let ip = parse_ip(&body.ip)?;
    state.pipeline.registry().deny(ip);
    Ok(Ack::ok(Some(ip)))
}

pub async fn get_events(
    State(state): State<AdminState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<SecurityEvent>> {
    let count = query
        .count
        .unwrap_or(DEFAULT_EVENT_COUNT)
        .min(MAX_EVENT_COUNT);
    Json(state.events.recent(count))
}
