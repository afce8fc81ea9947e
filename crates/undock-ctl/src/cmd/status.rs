//! Node status and on-demand announcement.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

#[derive(Deserialize)]
struct StatusResponse {
    id: String,
    services: Vec<LocalService>,
    peers_known: usize,
    endpoints: usize,
    active_sessions: usize,
    banned: usize,
}

#[derive(Deserialize)]
struct LocalService {
    id: String,
    image: String,
    port: u16,
}

#[derive(Deserialize)]
struct AnnounceResponse {
    services: usize,
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  undock Node Status");
    println!("═══════════════════════════════════════");
    println!("  Node id          : {}", &resp.id[..16.min(resp.id.len())]);
    println!("  Peers known      : {}", resp.peers_known);
    println!("  Routable targets : {}", resp.endpoints);
    println!("  Active sessions  : {}", resp.active_sessions);
    println!("  Banned addresses : {}", resp.banned);

    if resp.services.is_empty() {
        println!("\n  No local services.");
    } else {
        println!("\n  Local services:");
        for s in &resp.services {
            println!("  ┌─ {}", s.id);
            if !s.image.is_empty() {
                println!("  │  image : {}", s.image);
            }
            println!("  └─ port  : {}", s.port);
        }
    }

    Ok(())
}

pub async fn cmd_announce(port: u16) -> Result<()> {
    let resp: AnnounceResponse = post_json(&format!("{}/announce", base_url(port))).await?;
    println!("Announced {} local service(s).", resp.services);
    Ok(())
}
