//! Topic broadcast used for service announcements.
//!
//! Delivery is best effort and unordered. Subscribers see every message
//! published on a topic after they subscribed, their own included.

pub mod memory;

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

/// Per-topic buffer before slow subscribers start lagging.
pub const TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct GossipMessage {
    /// Transport-level sender address, when the transport observes one.
    pub source: Option<SocketAddr>,
    pub data: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("message too large: {0} bytes")]
    TooLarge(usize),
    #[error("send failed: {0}")]
    Send(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Gossip: Send + Sync {
    async fn publish(&self, topic: &str, data: Bytes) -> Result<(), GossipError>;

    async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<GossipMessage>, GossipError>;
}
