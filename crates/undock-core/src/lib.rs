//! undock-core — shared identity, wire format, and configuration.
//! All other undock crates depend on this one.

pub mod config;
pub mod crypto;
pub mod wire;

pub use crypto::{Keypair, PeerId};
pub use wire::{AnnouncedService, Announcement};
