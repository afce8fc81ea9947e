//! Announcement channel — publishes this node's services and ingests
//! everyone else's.
//!
//! Each accepted announcement overwrites the sender's `PeerInfo` and the
//! routing registry is rebuilt from the whole peer table. There are no
//! sequence numbers: under the default policy the newest arrival wins.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time;

use undock_core::config::AnnounceOrdering;
use undock_core::wire::{AnnouncedService, Announcement, ANNOUNCE_TOPIC};
use undock_core::PeerId;

use crate::gossip::{Gossip, GossipError, GossipMessage};
use crate::inventory::ServiceInventory;
use crate::load::LoadGauge;
use crate::peer::{PeerInfo, PeerRegistry, PeerTable};

pub struct Announcer {
    local_id: PeerId,
    overlay_port: u16,
    gossip: Arc<dyn Gossip>,
    inventory: Arc<dyn ServiceInventory>,
    peers: PeerTable,
    registry: PeerRegistry,
    ordering: AnnounceOrdering,
    load: LoadGauge,
    /// Serializes "read table, swap registry" so rebuilds never go backwards.
    rebuild: Mutex<()>,
}

impl Announcer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_id: PeerId,
        overlay_port: u16,
        gossip: Arc<dyn Gossip>,
        inventory: Arc<dyn ServiceInventory>,
        peers: PeerTable,
        registry: PeerRegistry,
        ordering: AnnounceOrdering,
        load: LoadGauge,
    ) -> Self {
        Self {
            local_id,
            overlay_port,
            gossip,
            inventory,
            peers,
            registry,
            ordering,
            load,
            rebuild: Mutex::new(()),
        }
    }

    /// The announcement this node would publish right now.
    pub fn snapshot(&self) -> Announcement {
        let load = self.load.current();
        Announcement {
            id: self.local_id,
            services: self
                .inventory
                .services()
                .into_iter()
                .map(|s| AnnouncedService {
                    service_id: s.id,
                    image: s.image,
                    port: s.port,
                    load,
                })
                .collect(),
            last_seen: Utc::now(),
            overlay_port: self.overlay_port,
        }
    }

    /// Publish the current snapshot once.
    pub async fn publish(&self) -> Result<(), GossipError> {
        let ann = self.snapshot();
        let services = ann.services.len();
        self.gossip
            .publish(ANNOUNCE_TOPIC, Bytes::from(ann.encode()))
            .await?;
        tracing::trace!(services, "announcement published");
        Ok(())
    }

    /// Apply one received message. Returns true if it changed the peer table.
    ///
    /// Undecodable messages and our own announcements are dropped.
    pub fn ingest(&self, msg: &GossipMessage) -> bool {
        let ann = match Announcement::decode(&msg.data) {
            Ok(ann) => ann,
            Err(e) => {
                tracing::trace!(error = %e, source = ?msg.source, "discarding malformed announcement");
                return false;
            }
        };
        if ann.id == self.local_id {
            return false;
        }

        let addr = overlay_addr(msg.source, ann.overlay_port);
        let info = PeerInfo {
            id: ann.id,
            services: ann.services,
            last_seen: ann.last_seen,
            addr,
            received_at: Instant::now(),
        };
        if !self.peers.upsert(info, self.ordering) {
            tracing::debug!(peer = %ann.id.short(), "stale announcement ignored");
            return false;
        }
        self.rebuild_registry();
        true
    }

    /// Drop peers silent for longer than `ttl`; rebuild if any went.
    pub fn reap(&self, ttl: Duration) -> usize {
        let removed = self.peers.reap(ttl);
        if removed > 0 {
            self.rebuild_registry();
        }
        removed
    }

    fn rebuild_registry(&self) {
        let _guard = self.rebuild.lock().unwrap_or_else(|e| e.into_inner());
        self.registry.update(self.peers.endpoints());
    }

    /// Publish every `interval` until shutdown. The first publish is immediate.
    pub async fn publish_loop(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut ticker = time::interval(interval);
        tracing::info!(interval_secs = interval.as_secs(), "announcement publisher starting");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.publish().await {
                        tracing::warn!(error = %e, "announcement publish failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("announcement publisher stopping");
                    return Ok(());
                }
            }
        }
    }

    /// Ingest everything arriving on `rx` until shutdown or the topic closes.
    pub async fn ingest_loop(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<GossipMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Ok(msg) => {
                        self.ingest(&msg);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "announcement subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("announcement topic closed");
                        return Ok(());
                    }
                },
                _ = shutdown.recv() => return Ok(()),
            }
        }
    }

    /// Reap stale peers every `ttl / 2` until shutdown.
    pub async fn reap_loop(
        self: Arc<Self>,
        ttl: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut ticker = time::interval((ttl / 2).max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.reap(ttl);
                    if removed > 0 {
                        tracing::info!(removed, remaining = self.peers.len(), "stale peers reaped");
                    }
                }
                _ = shutdown.recv() => return Ok(()),
            }
        }
    }
}

/// Where to open overlay streams to an announcer: the host the datagram came
/// from (scope included) on the port it announced.
fn overlay_addr(source: Option<SocketAddr>, overlay_port: u16) -> Option<SocketAddr> {
    if overlay_port == 0 {
        return None;
    }
    source.map(|mut addr| {
        addr.set_port(overlay_port);
        addr
    })
}
