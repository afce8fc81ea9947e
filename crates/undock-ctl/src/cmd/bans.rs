//! Ban list commands.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::http::{base_url, get_json, post_json_body};

#[derive(Deserialize)]
struct BansResponse {
    bans: Vec<String>,
}

#[derive(Serialize)]
struct BanRequest {
    addr: String,
}

#[derive(Deserialize)]
struct BanResponse {
    addr: String,
    newly_banned: bool,
}

pub async fn cmd_bans(port: u16) -> Result<()> {
    let resp: BansResponse = get_json(&format!("{}/bans", base_url(port))).await?;

    if resp.bans.is_empty() {
        println!("No banned addresses.");
        return Ok(());
    }

    println!("Banned addresses ({}):", resp.bans.len());
    for addr in &resp.bans {
        println!("  {}", addr);
    }

    Ok(())
}

pub async fn cmd_ban(port: u16, addr: &str) -> Result<()> {
    let resp: BanResponse = post_json_body(
        &format!("{}/ban", base_url(port)),
        &BanRequest {
            addr: addr.to_string(),
        },
    )
    .await?;

    if resp.newly_banned {
        println!("Banned {}.", resp.addr);
    } else {
        println!("{} was already banned.", resp.addr);
    }
    Ok(())
}
