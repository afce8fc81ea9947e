//! HTTP API handlers — the routed front door plus JSON views of router state.

pub mod route;
pub mod stats;
pub mod status;

use std::sync::Arc;

use undock_core::PeerId;
use undock_services::{
    Announcer, BanList, PeerRegistry, PeerTable, Router, ServiceInventory, SessionTracker,
    StatsLedger,
};

#[derive(Clone)]
pub struct ApiState {
    pub router: Router,
    pub stats: StatsLedger,
    pub bans: BanList,
    pub sessions: SessionTracker,
    pub registry: PeerRegistry,
    pub peers: PeerTable,
    pub announcer: Arc<Announcer>,
    pub inventory: Arc<dyn ServiceInventory>,
    pub local_id: PeerId,
}

pub use route::handle_route;
pub use stats::{handle_ban, handle_bans, handle_stats};
pub use status::{handle_announce, handle_endpoints, handle_peers, handle_sessions, handle_status};
