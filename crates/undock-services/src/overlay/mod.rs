//! Overlay transport boundary.
//!
//! The router only needs authenticated, ordered, bidirectional byte streams
//! addressed by peer identity. Each stream carries exactly one message per
//! direction: the opener writes, calls `finish`, then reads until EOF.
//!
//! Implementations:
//!   - `memory`: in-process network for tests and simulation.
//!   - `undockd`'s TCP overlay: Noise_XX over TCP.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use undock_core::PeerId;

/// Largest message either side will buffer from one stream.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("peer {0} unreachable")]
    Unreachable(PeerId),
    #[error("peer does not speak protocol {0}")]
    UnsupportedProtocol(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("message exceeds {0} bytes")]
    TooLarge(usize),
    #[error("stream closed")]
    Closed,
    #[error("peer went silent")]
    TimedOut,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// One open stream to a remote peer.
#[async_trait]
pub trait OverlayStream: Send {
    /// Identity of the node on the other end.
    fn remote(&self) -> PeerId;

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), OverlayError>;

    /// Close the write side. The remote's `read_to_end` returns after this.
    async fn finish(&mut self) -> Result<(), OverlayError>;

    /// Read until the remote finishes its write side.
    async fn read_to_end(&mut self, limit: usize) -> Result<Vec<u8>, OverlayError>;
}

pub type BoxStream = Box<dyn OverlayStream>;

/// A node's handle on the overlay.
#[async_trait]
pub trait Overlay: Send + Sync {
    fn local_id(&self) -> PeerId;

    /// Open a fresh stream to `peer` negotiated for `protocol`.
    async fn open_stream(&self, peer: PeerId, protocol: &str) -> Result<BoxStream, OverlayError>;
}

/// Serves inbound streams for one protocol.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle(&self, stream: BoxStream);
}

/// Maps protocol ids to the handler serving them. Clones share state.
#[derive(Clone, Default)]
pub struct ProtocolHandlers {
    handlers: Arc<DashMap<String, Arc<dyn StreamHandler>>>,
}

impl ProtocolHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, protocol: &str, handler: Arc<dyn StreamHandler>) {
        self.handlers.insert(protocol.to_string(), handler);
    }

    pub fn supports(&self, protocol: &str) -> bool {
        self.handlers.contains_key(protocol)
    }

    /// Hand an inbound stream to the handler for `protocol`.
    /// Returns false, dropping the stream, if nothing serves it.
    pub async fn dispatch(&self, protocol: &str, stream: BoxStream) -> bool {
        // Clone out so the map shard is not held across the handler.
        let handler = self.handlers.get(protocol).map(|h| h.value().clone());
        match handler {
            Some(handler) => {
                handler.handle(stream).await;
                true
            }
            None => {
                tracing::debug!(protocol, remote = %stream.remote().short(), "no handler for protocol");
                false
            }
        }
    }
}
