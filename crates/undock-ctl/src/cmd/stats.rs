//! Per-service traffic counters.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceStats {
    requests: u64,
    errors: u64,
    bandwidth: u64,
    last_update: Option<String>,
}

pub async fn cmd_stats(port: u16) -> Result<()> {
    let stats: BTreeMap<String, ServiceStats> =
        get_json(&format!("{}/stats", base_url(port))).await?;

    if stats.is_empty() {
        println!("No traffic routed yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Service Stats ({})", stats.len());
    println!("═══════════════════════════════════════");
    for (service, s) in &stats {
        println!("  ┌─ {}", service);
        println!("  │  requests  : {}", s.requests);
        println!("  │  errors    : {}", s.errors);
        println!(
            "  │  bandwidth : {} bytes ({:.1} KB)",
            s.bandwidth,
            s.bandwidth as f64 / 1024.0
        );
        println!("  └─ updated   : {}", s.last_update.as_deref().unwrap_or("never"));
    }

    Ok(())
}
