//! undock-services — routing state and the request router.
//!
//! Shared tables (stats, bans, sessions, peers) are cheap to clone; clones
//! share state and only ever hand out copies.

pub mod announce;
pub mod bans;
pub mod codec;
pub mod dispatch;
pub mod gossip;
pub mod inventory;
pub mod load;
pub mod overlay;
pub mod peer;
pub mod router;
pub mod session;
pub mod stats;

pub use announce::Announcer;
pub use bans::BanList;
pub use dispatch::{DispatchError, HttpDispatcher, LocalDispatcher};
pub use gossip::{Gossip, GossipError, GossipMessage};
pub use inventory::{ServiceInventory, StaticInventory};
pub use load::LoadGauge;
pub use overlay::{BoxStream, Overlay, OverlayError, OverlayStream, ProtocolHandlers, StreamHandler};
pub use peer::{PeerInfo, PeerRegistry, PeerTable, RegistryError, ServiceEndpoint};
pub use router::{ForwardError, RouteError, Router};
pub use session::{Session, SessionGuard, SessionTracker};
pub use stats::{ServiceStats, StatsLedger};
