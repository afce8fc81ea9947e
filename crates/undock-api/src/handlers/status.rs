//! /status, /peers, /endpoints, /sessions, /announce handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use undock_core::config::LocalService;
use undock_services::{PeerInfo, ServiceEndpoint, Session};

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub id: String,
    pub services: Vec<LocalService>,
    pub peers_known: usize,
    pub endpoints: usize,
    pub active_sessions: usize,
    pub banned: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        id: state.local_id.to_string(),
        services: state.inventory.services(),
        peers_known: state.peers.len(),
        endpoints: state.registry.len(),
        active_sessions: state.sessions.active(),
        banned: state.bans.len(),
    })
}

// ── /peers ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
}

pub async fn handle_peers(State(state): State<ApiState>) -> Json<PeersResponse> {
    Json(PeersResponse {
        peers: state.peers.list(),
    })
}

// ── /endpoints ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EndpointsResponse {
    pub endpoints: Vec<ServiceEndpoint>,
}

pub async fn handle_endpoints(State(state): State<ApiState>) -> Json<EndpointsResponse> {
    Json(EndpointsResponse {
        endpoints: state.registry.snapshot(),
    })
}

// ── /sessions ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<Session>,
}

pub async fn handle_sessions(State(state): State<ApiState>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.sessions.list(),
    })
}

// ── /announce (POST) ──────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct AnnounceResponse {
    pub services: usize,
}

pub async fn handle_announce(
    State(state): State<ApiState>,
) -> Result<Json<AnnounceResponse>, (StatusCode, String)> {
    state
        .announcer
        .publish()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    tracing::info!("announcement published via API");
    Ok(Json(AnnounceResponse {
        services: state.inventory.services().len(),
    }))
}
