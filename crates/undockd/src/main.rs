//! undockd — routes HTTP requests for container services across peers.

use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use undock_core::config::UndockConfig;
use undock_core::crypto::Keypair;
use undock_core::wire::{ANNOUNCE_PORT, ANNOUNCE_TOPIC, ROUTER_PROTOCOL_ID};

use undock_api::ApiState;
use undock_services::{
    Announcer, BanList, Gossip, HttpDispatcher, LoadGauge, PeerRegistry, PeerTable,
    ProtocolHandlers, Router, ServiceInventory, SessionTracker, StaticInventory, StatsLedger,
};

mod gossip;
mod overlay;

use gossip::UdpGossip;
use overlay::TcpOverlay;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = UndockConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = UndockConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        UndockConfig::default()
    });

    let interface = std::env::args()
        .nth(1)
        .or_else(|| Some(config.network.interface.clone()).filter(|i| !i.is_empty()))
        .context("no interface given: pass one as the first argument or set network.interface")?;
    tracing::info!(interface, "undockd starting");

    let interface_index = gossip::if_index(&interface)?;

    // Keypair
    let keypair = Arc::new(
        Keypair::load_or_generate(&config.identity.keypair_path)
            .context("failed to load overlay keypair")?,
    );
    let local_id = keypair.peer_id();
    tracing::info!(peer = %local_id, "keypair ready");

    // Shared state
    let stats = StatsLedger::new();
    let bans = BanList::new();
    let sessions = SessionTracker::new();
    let registry = PeerRegistry::new();
    let peers = PeerTable::new();
    let serving = LoadGauge::new();
    let inventory: Arc<dyn ServiceInventory> = Arc::new(StaticInventory::new(config.services.clone()));
    tracing::info!(count = config.services.len(), "local services loaded");

    // Overlay
    let overlay_listener = TcpListener::bind(SocketAddrV6::new(
        Ipv6Addr::UNSPECIFIED,
        config.network.overlay_port,
        0,
        0,
    ))
    .await
    .context("failed to bind overlay listener")?;
    let overlay_port = overlay_listener.local_addr()?.port();

    let handlers = ProtocolHandlers::new();
    let overlay = Arc::new(TcpOverlay::new(keypair.clone(), peers.clone(), handlers.clone()));

    // Router
    let dispatcher = Arc::new(
        HttpDispatcher::new(inventory.clone()).context("failed to build local dispatcher")?,
    );
    let router = Router::new(
        overlay.clone(),
        registry.clone(),
        stats.clone(),
        bans.clone(),
        sessions.clone(),
        dispatcher,
        serving.clone(),
    )
    .with_max_concurrent_forwards(config.routing.max_concurrent_forwards);
    handlers.register(ROUTER_PROTOCOL_ID, Arc::new(router.clone()));

    // Announcements
    let gossip = Arc::new(
        UdpGossip::bind(interface_index, ANNOUNCE_PORT)
            .context("failed to open announcement sockets")?,
    );
    let announcements = gossip.subscribe(ANNOUNCE_TOPIC).await?;
    let announcer = Arc::new(Announcer::new(
        local_id,
        overlay_port,
        gossip.clone(),
        inventory.clone(),
        peers.clone(),
        registry.clone(),
        config.announce.ordering,
        serving,
    ));

    // Shutdown signal
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Tasks ────────────────────────────────────────────────────────────────

    let overlay_task = tokio::spawn(
        overlay
            .clone()
            .accept_loop(overlay_listener, shutdown_tx.subscribe()),
    );
    let gossip_task = tokio::spawn(gossip.clone().recv_loop(shutdown_tx.subscribe()));
    let ingest_task = tokio::spawn(
        announcer
            .clone()
            .ingest_loop(announcements, shutdown_tx.subscribe()),
    );
    let publish_task = tokio::spawn(announcer.clone().publish_loop(
        Duration::from_secs(config.announce.interval_secs.max(1)),
        shutdown_tx.subscribe(),
    ));
    let reap_task = (config.announce.peer_ttl_secs > 0).then(|| {
        tokio::spawn(announcer.clone().reap_loop(
            Duration::from_secs(config.announce.peer_ttl_secs),
            shutdown_tx.subscribe(),
        ))
    });
    let reap_task = async move {
        match reap_task {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    };

    let api_state = ApiState {
        router,
        stats,
        bans,
        sessions,
        registry,
        peers,
        announcer,
        inventory,
        local_id,
    };
    let api_task = {
        let shutdown = shutdown_tx.subscribe();
        let bind = config.network.api_bind.clone();
        let port = config.network.api_port;
        tokio::spawn(async move { undock_api::serve(api_state, &bind, port, shutdown).await })
    };

    tracing::info!(overlay_port, api_port = config.network.api_port, "undockd ready");

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = overlay_task       => tracing::error!("overlay listener exited: {:?}", r),
        r = gossip_task        => tracing::error!("gossip listener exited: {:?}", r),
        r = ingest_task        => tracing::error!("announcement ingest exited: {:?}", r),
        r = publish_task       => tracing::error!("announcement publisher exited: {:?}", r),
        r = reap_task          => tracing::error!("peer reaper exited: {:?}", r),
        r = api_task           => tracing::error!("API server exited: {:?}", r),
    }

    Ok(())
}
