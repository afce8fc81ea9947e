//! undock integration test harness.
//!
//! Each test builds a small cluster inside the test process. Nodes share an
//! in-memory overlay and gossip bus, serve the real HTTP API on loopback,
//! and reach their workloads through the real HTTP dispatcher. Workloads are
//! tiny axum servers that describe the request they received.

mod admin;
mod failures;
mod routing;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use axum::body::Bytes;
use axum::http::{Method, Uri};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use undock_api::ApiState;
use undock_core::config::{AnnounceOrdering, LocalService};
use undock_core::wire::{ANNOUNCE_TOPIC, ROUTER_PROTOCOL_ID};
use undock_core::{Keypair, PeerId};
use undock_services::gossip::memory::MemoryGossipBus;
use undock_services::overlay::memory::MemoryNetwork;
use undock_services::{
    Announcer, BanList, Gossip, HttpDispatcher, LoadGauge, PeerRegistry, PeerTable,
    ProtocolHandlers, Router, ServiceInventory, SessionTracker, StaticInventory, StatsLedger,
};

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct Node {
    pub id: PeerId,
    pub api: SocketAddr,
    pub stats: StatsLedger,
    pub sessions: SessionTracker,
    pub registry: PeerRegistry,
    pub peers: PeerTable,
    pub serving: LoadGauge,
    pub announcer: Arc<Announcer>,
    services: usize,
}

impl Node {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.api, path)
    }
}

pub struct Cluster {
    pub net: MemoryNetwork,
    bus: MemoryGossipBus,
    pub nodes: Vec<Node>,
    shutdown: broadcast::Sender<()>,
}

impl Cluster {
    pub fn new() -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            net: MemoryNetwork::new(),
            bus: MemoryGossipBus::new(),
            nodes: Vec::new(),
            shutdown,
        }
    }

    /// Start a node hosting `services`. Returns its index in `nodes`.
    pub async fn add_node(&mut self, services: Vec<LocalService>) -> Result<usize> {
        let id = Keypair::generate().peer_id();
        let stats = StatsLedger::new();
        let bans = BanList::new();
        let sessions = SessionTracker::new();
        let registry = PeerRegistry::new();
        let peers = PeerTable::new();
        let serving = LoadGauge::new();
        let hosted = services.len();
        let inventory: Arc<dyn ServiceInventory> = Arc::new(StaticInventory::new(services));

        let handlers = ProtocolHandlers::new();
        let overlay = Arc::new(self.net.join(id, handlers.clone()));
        let dispatcher = Arc::new(HttpDispatcher::new(inventory.clone())?);
        let router = Router::new(
            overlay,
            registry.clone(),
            stats.clone(),
            bans.clone(),
            sessions.clone(),
            dispatcher,
            serving.clone(),
        );
        handlers.register(ROUTER_PROTOCOL_ID, Arc::new(router.clone()));

        let announcer = Arc::new(Announcer::new(
            id,
            0,
            Arc::new(self.bus.clone()),
            inventory.clone(),
            peers.clone(),
            registry.clone(),
            AnnounceOrdering::LastWriteWins,
            serving.clone(),
        ));
        let rx = self.bus.subscribe(ANNOUNCE_TOPIC).await?;
        tokio::spawn(announcer.clone().ingest_loop(rx, self.shutdown.subscribe()));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let api = listener.local_addr()?;
        let state = ApiState {
            router,
            stats: stats.clone(),
            bans,
            sessions: sessions.clone(),
            registry: registry.clone(),
            peers: peers.clone(),
            announcer: announcer.clone(),
            inventory,
            local_id: id,
        };
        tokio::spawn(undock_api::serve_on(listener, state, self.shutdown.subscribe()));

        self.nodes.push(Node {
            id,
            api,
            stats,
            sessions,
            registry,
            peers,
            serving,
            announcer,
            services: hosted,
        });
        Ok(self.nodes.len() - 1)
    }

    /// Publish every node's services and wait until each node knows every
    /// other node and has every remote endpoint in its registry.
    pub async fn announce_all(&self) -> Result<()> {
        for node in &self.nodes {
            node.announcer.publish().await?;
        }
        let total: usize = self.nodes.iter().map(|n| n.services).sum();
        for node in &self.nodes {
            let expected = total - node.services;
            let others = self.nodes.len() - 1;
            wait_for(5, || node.peers.len() == others && node.registry.len() == expected).await?;
        }
        Ok(())
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

pub fn service(id: &str, port: u16) -> LocalService {
    LocalService {
        id: id.to_string(),
        image: format!("{id}:latest"),
        port,
    }
}

/// Start a workload that answers every request with
/// `"<name> <METHOD> <path> <body length>"`. Returns its port.
pub async fn spawn_upstream(name: &'static str) -> Result<u16> {
    let app = axum::Router::new().fallback(move |method: Method, uri: Uri, body: Bytes| async move {
        format!("{name} {method} {uri} {}", body.len())
    });
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move { axum::serve(listener, app).await });
    Ok(port)
}

/// A loopback port nothing listens on.
pub async fn closed_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("reqwest client")
}

/// Poll `cond` every 10ms for up to `secs` seconds.
pub async fn wait_for(secs: u64, mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("condition not met within {secs}s")
}
