//! /stats, /ban, /bans handlers.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use undock_services::ServiceStats;

use super::ApiState;

// ── /stats ────────────────────────────────────────────────────────────────────

pub async fn handle_stats(State(state): State<ApiState>) -> Json<BTreeMap<String, ServiceStats>> {
    Json(state.stats.snapshot())
}

// ── /ban (POST) ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct BanRequest {
    #[serde(alias = "Addr")]
    pub addr: String,
}

#[derive(Serialize)]
pub struct BanResponse {
    pub addr: String,
    /// False if the address was already banned.
    pub newly_banned: bool,
}

pub async fn handle_ban(
    State(state): State<ApiState>,
    Json(req): Json<BanRequest>,
) -> Result<Json<BanResponse>, (StatusCode, String)> {
    if req.addr.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "addr must not be empty".to_string()));
    }
    let newly_banned = state.bans.ban(&req.addr);
    Ok(Json(BanResponse {
        addr: undock_services::bans::normalize(&req.addr),
        newly_banned,
    }))
}

// ── /bans ─────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct BansResponse {
    pub bans: Vec<String>,
}

pub async fn handle_bans(State(state): State<ApiState>) -> Json<BansResponse> {
    Json(BansResponse {
        bans: state.bans.list(),
    })
}
