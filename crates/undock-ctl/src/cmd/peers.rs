//! Known peers, routable endpoints and in-flight sessions.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

#[derive(Deserialize)]
struct PeersResponse {
    peers: Vec<PeerInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerInfo {
    id: String,
    services: Vec<AnnouncedService>,
    last_seen: String,
    addr: Option<String>,
}

#[derive(Deserialize)]
struct AnnouncedService {
    #[serde(rename = "serviceID")]
    service_id: String,
    #[serde(default)]
    load: u64,
}

#[derive(Deserialize)]
struct EndpointsResponse {
    endpoints: Vec<Endpoint>,
}

#[derive(Deserialize)]
struct Endpoint {
    #[serde(rename = "serviceID")]
    service_id: String,
    #[serde(rename = "peerID")]
    peer_id: String,
    load: u64,
}

#[derive(Deserialize)]
struct SessionsResponse {
    sessions: Vec<Session>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    id: String,
    remote_addr: String,
    started_at: String,
}

fn short(id: &str) -> &str {
    &id[..16.min(id.len())]
}

pub async fn cmd_peers(port: u16) -> Result<()> {
    let resp: PeersResponse = get_json(&format!("{}/peers", base_url(port))).await?;

    if resp.peers.is_empty() {
        println!("No peers discovered yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Known Peers ({})", resp.peers.len());
    println!("═══════════════════════════════════════");
    for p in &resp.peers {
        println!("  ┌─ {}", short(&p.id));
        println!("  │  addr      : {}", p.addr.as_deref().unwrap_or("-"));
        for s in &p.services {
            println!("  │  service   : {} (load {})", s.service_id, s.load);
        }
        println!("  └─ last seen : {}", p.last_seen);
    }

    Ok(())
}

pub async fn cmd_endpoints(port: u16) -> Result<()> {
    let resp: EndpointsResponse = get_json(&format!("{}/endpoints", base_url(port))).await?;

    if resp.endpoints.is_empty() {
        println!("No routable endpoints.");
        return Ok(());
    }

    println!("  {:<24} {:<18} {:>6}", "SERVICE", "PEER", "LOAD");
    for e in &resp.endpoints {
        println!("  {:<24} {:<18} {:>6}", e.service_id, short(&e.peer_id), e.load);
    }

    Ok(())
}

pub async fn cmd_sessions(port: u16) -> Result<()> {
    let resp: SessionsResponse = get_json(&format!("{}/sessions", base_url(port))).await?;

    if resp.sessions.is_empty() {
        println!("No requests in flight.");
        return Ok(());
    }

    println!("  {:<18} {:<28} {}", "SESSION", "REMOTE", "STARTED");
    for s in &resp.sessions {
        println!("  {:<18} {:<28} {}", short(&s.id), s.remote_addr, s.started_at);
    }

    Ok(())
}
