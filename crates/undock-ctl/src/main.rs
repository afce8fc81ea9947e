//! undock-ctl — command-line interface for the undock daemon.

use anyhow::{Context, Result};

mod cmd;

const DEFAULT_PORT: u16 = 9101;

fn print_usage() {
    println!("Usage: undock-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status        Show node id, local services and counts");
    println!("  stats         Per-service request, error and bandwidth counters");
    println!("  peers         List peers heard from");
    println!("  endpoints     List routable (service, peer, load) targets");
    println!("  sessions      List requests currently being routed");
    println!("  bans          List banned addresses");
    println!("  ban <addr>    Ban a client address");
    println!("  announce      Publish this node's services now");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(port).await,
        ["stats"] => cmd::stats::cmd_stats(port).await,
        ["peers"] => cmd::peers::cmd_peers(port).await,
        ["endpoints"] => cmd::peers::cmd_endpoints(port).await,
        ["sessions"] => cmd::peers::cmd_sessions(port).await,
        ["bans"] => cmd::bans::cmd_bans(port).await,
        ["ban", addr] => cmd::bans::cmd_ban(port, addr).await,
        ["announce"] => cmd::status::cmd_announce(port).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
