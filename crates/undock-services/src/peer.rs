//! Peer registry — who hosts which service, and how busy they are.
//!
//! Two structures live here:
//!   - `PeerTable`: one `PeerInfo` per remote node, fed by announcements.
//!   - `PeerRegistry`: the flattened (service, peer, load) endpoint set the
//!     router selects from. Rebuilt wholesale from the table.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use undock_core::config::AnnounceOrdering;
use undock_core::wire::AnnouncedService;
use undock_core::PeerId;

/// One peer's current capacity to serve one logical service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEndpoint {
    #[serde(rename = "serviceID")]
    pub service_id: String,
    #[serde(rename = "peerID")]
    pub peer_id: PeerId,
    pub load: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no peer available")]
    NotAvailable,
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Process-wide endpoint set. Clones share state.
///
/// Writers swap in a whole new set; readers take a reference-counted copy of
/// the current one, so a reader never sees half an update.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    endpoints: Arc<RwLock<Arc<Vec<ServiceEndpoint>>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire endpoint set.
    pub fn update(&self, endpoints: Vec<ServiceEndpoint>) {
        let next = Arc::new(endpoints);
        let mut slot = self.endpoints.write().unwrap_or_else(|e| e.into_inner());
        *slot = next;
    }

    /// Endpoint with the smallest load across every service.
    /// Ties go to the first one in the set.
    pub fn select_least_loaded(&self) -> Result<ServiceEndpoint, RegistryError> {
        least_loaded(self.current().iter())
    }

    /// Endpoint with the smallest load among those serving `service_id`.
    pub fn select_for_service(&self, service_id: &str) -> Result<ServiceEndpoint, RegistryError> {
        least_loaded(self.current().iter().filter(|e| e.service_id == service_id))
    }

    pub fn snapshot(&self) -> Vec<ServiceEndpoint> {
        self.current().as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    fn current(&self) -> Arc<Vec<ServiceEndpoint>> {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn least_loaded<'a>(
    endpoints: impl Iterator<Item = &'a ServiceEndpoint>,
) -> Result<ServiceEndpoint, RegistryError> {
    let mut best: Option<&ServiceEndpoint> = None;
    for e in endpoints {
        // Strict `<` keeps the first of equal loads.
        if best.map_or(true, |b| e.load < b.load) {
            best = Some(e);
        }
    }
    best.cloned().ok_or(RegistryError::NotAvailable)
}

// ── Peer table ────────────────────────────────────────────────────────────────

/// What we know about one remote node.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: PeerId,
    pub services: Vec<AnnouncedService>,
    /// Timestamp carried by the peer's latest accepted announcement.
    pub last_seen: DateTime<Utc>,
    /// Overlay address observed for this peer, if the transport reports one.
    pub addr: Option<SocketAddr>,
    /// Local receive time of the latest accepted announcement.
    #[serde(skip)]
    pub received_at: Instant,
}

/// All known remote peers, keyed on identity. Clones share state.
#[derive(Clone, Default)]
pub struct PeerTable {
    peers: Arc<DashMap<PeerId, PeerInfo>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a peer. Returns `false` if the ordering policy
    /// rejected it as older than what is stored.
    pub fn upsert(&self, info: PeerInfo, ordering: AnnounceOrdering) -> bool {
        match self.peers.entry(info.id) {
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if ordering == AnnounceOrdering::Monotonic
                    && info.last_seen < slot.get().last_seen
                {
                    return false;
                }
                slot.insert(info);
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::info!(peer = %info.id.short(), services = info.services.len(), "peer discovered");
                slot.insert(info);
            }
        }
        true
    }

    pub fn get(&self, id: &PeerId) -> Option<PeerInfo> {
        self.peers.get(id).map(|p| p.value().clone())
    }

    /// Overlay address last observed for a peer.
    pub fn addr_of(&self, id: &PeerId) -> Option<SocketAddr> {
        self.peers.get(id).and_then(|p| p.addr)
    }

    /// Copy of every peer, sorted by id.
    pub fn list(&self) -> Vec<PeerInfo> {
        let mut out: Vec<PeerInfo> = self.peers.iter().map(|p| p.value().clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Flatten the table into routing endpoints: by peer id, then in the
    /// order each peer announced its services.
    pub fn endpoints(&self) -> Vec<ServiceEndpoint> {
        self.list()
            .into_iter()
            .flat_map(|p| {
                p.services.into_iter().map(move |s| ServiceEndpoint {
                    service_id: s.service_id,
                    peer_id: p.id,
                    load: s.load,
                })
            })
            .collect()
    }

    /// Drop peers not heard from within `ttl`. Returns how many were removed.
    pub fn reap(&self, ttl: Duration) -> usize {
        let before = self.peers.len();
        self.peers.retain(|id, p| {
            let keep = p.received_at.elapsed() < ttl;
            if !keep {
                tracing::info!(peer = %id.short(), "peer expired");
            }
            keep
        });
        before.saturating_sub(self.peers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId::from_bytes([n; 32])
    }

    fn ep(service: &str, p: u8, load: u64) -> ServiceEndpoint {
        ServiceEndpoint {
            service_id: service.into(),
            peer_id: peer(p),
            load,
        }
    }

    fn svc(id: &str, load: u64) -> AnnouncedService {
        AnnouncedService {
            service_id: id.into(),
            image: String::new(),
            port: 8080,
            load,
        }
    }

    fn info(p: u8, services: Vec<AnnouncedService>, last_seen: &str) -> PeerInfo {
        PeerInfo {
            id: peer(p),
            services,
            last_seen: last_seen.parse().unwrap(),
            addr: None,
            received_at: Instant::now(),
        }
    }

    #[test]
    fn empty_registry_is_not_available() {
        let registry = PeerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.select_least_loaded(), Err(RegistryError::NotAvailable));
        assert_eq!(registry.select_for_service("a"), Err(RegistryError::NotAvailable));
    }

    #[test]
    fn selects_minimum_load() {
        let registry = PeerRegistry::new();
        registry.update(vec![ep("a", 1, 5), ep("a", 2, 2)]);
        assert_eq!(registry.select_least_loaded().unwrap().peer_id, peer(2));
    }

    #[test]
    fn ties_go_to_first_encountered() {
        let registry = PeerRegistry::new();
        registry.update(vec![ep("a", 3, 1), ep("b", 1, 1), ep("a", 2, 4)]);
        assert_eq!(registry.select_least_loaded().unwrap().peer_id, peer(3));
    }

    #[test]
    fn update_replaces_the_whole_set() {
        let registry = PeerRegistry::new();
        registry.update(vec![ep("a", 1, 0), ep("a", 2, 9)]);
        registry.update(vec![ep("b", 3, 7)]);

        assert_eq!(registry.snapshot(), vec![ep("b", 3, 7)]);
        assert_eq!(registry.select_least_loaded().unwrap(), ep("b", 3, 7));

        registry.update(Vec::new());
        assert_eq!(registry.select_least_loaded(), Err(RegistryError::NotAvailable));
    }

    #[test]
    fn selection_always_comes_from_last_update() {
        let registry = PeerRegistry::new();
        let sets = [
            vec![ep("a", 1, 3), ep("b", 2, 1)],
            vec![],
            vec![ep("c", 4, 10), ep("c", 5, 10), ep("d", 6, 2)],
            vec![ep("a", 7, 0)],
        ];
        for set in sets {
            registry.update(set.clone());
            match registry.select_least_loaded() {
                Ok(chosen) => {
                    assert!(set.contains(&chosen));
                    assert!(set.iter().all(|e| e.load >= chosen.load));
                }
                Err(RegistryError::NotAvailable) => assert!(set.is_empty()),
            }
        }
    }

    #[test]
    fn per_service_selection_filters_by_service() {
        let registry = PeerRegistry::new();
        registry.update(vec![ep("a", 1, 5), ep("b", 2, 0), ep("a", 3, 2)]);

        assert_eq!(registry.select_least_loaded().unwrap().peer_id, peer(2));
        assert_eq!(registry.select_for_service("a").unwrap().peer_id, peer(3));
        assert_eq!(registry.select_for_service("zzz"), Err(RegistryError::NotAvailable));
    }

    #[test]
    fn snapshot_does_not_alias_registry() {
        let registry = PeerRegistry::new();
        registry.update(vec![ep("a", 1, 1)]);
        let mut snap = registry.snapshot();
        snap.clear();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn last_write_wins_accepts_older_announcement() {
        let table = PeerTable::new();
        assert!(table.upsert(info(1, vec![svc("a", 0)], "2026-10-19T12:00:10Z"), AnnounceOrdering::LastWriteWins));
        assert!(table.upsert(info(1, vec![svc("b", 0)], "2026-10-19T12:00:00Z"), AnnounceOrdering::LastWriteWins));

        let stored = table.get(&peer(1)).unwrap();
        assert_eq!(stored.services[0].service_id, "b");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn monotonic_rejects_older_announcement() {
        let table = PeerTable::new();
        assert!(table.upsert(info(1, vec![svc("a", 0)], "2026-10-19T12:00:10Z"), AnnounceOrdering::Monotonic));
        assert!(!table.upsert(info(1, vec![svc("b", 0)], "2026-10-19T12:00:00Z"), AnnounceOrdering::Monotonic));
        assert!(table.upsert(info(1, vec![svc("c", 0)], "2026-10-19T12:00:10Z"), AnnounceOrdering::Monotonic));

        let stored = table.get(&peer(1)).unwrap();
        assert_eq!(stored.services[0].service_id, "c");
        assert_eq!(stored.last_seen, "2026-10-19T12:00:10Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn endpoints_are_ordered_by_peer_then_announcement() {
        let table = PeerTable::new();
        let ts = "2026-10-19T12:00:00Z";
        table.upsert(info(2, vec![svc("x", 1)], ts), AnnounceOrdering::LastWriteWins);
        table.upsert(info(1, vec![svc("b", 4), svc("a", 3)], ts), AnnounceOrdering::LastWriteWins);

        assert_eq!(
            table.endpoints(),
            vec![ep("b", 1, 4), ep("a", 1, 3), ep("x", 2, 1)]
        );
    }

    #[test]
    fn reap_removes_only_stale_peers() {
        let table = PeerTable::new();
        let ts = "2026-10-19T12:00:00Z";
        let mut old = info(1, vec![svc("a", 0)], ts);
        old.received_at = Instant::now() - Duration::from_secs(120);
        table.upsert(old, AnnounceOrdering::LastWriteWins);
        table.upsert(info(2, vec![svc("a", 0)], ts), AnnounceOrdering::LastWriteWins);

        assert_eq!(table.reap(Duration::from_secs(60)), 1);
        assert!(table.get(&peer(1)).is_none());
        assert!(table.get(&peer(2)).is_some());
    }

    #[test]
    fn peer_info_serializes_without_receive_time() {
        let json = serde_json::to_value(info(1, vec![svc("a", 2)], "2026-10-19T12:00:00Z")).unwrap();
        assert_eq!(json["id"], "01".repeat(32));
        assert_eq!(json["lastSeen"], "2026-10-19T12:00:00Z");
        assert_eq!(json["services"][0]["serviceID"], "a");
        assert!(json.get("receivedAt").is_none());
    }
}
