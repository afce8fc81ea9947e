//! In-process overlay: every node joins a shared `MemoryNetwork` and streams
//! are `tokio::io::duplex` pairs. Used by tests and local simulation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use undock_core::PeerId;

use super::{BoxStream, Overlay, OverlayError, OverlayStream, ProtocolHandlers};

const DUPLEX_BUF_SIZE: usize = 64 * 1024;

struct Node {
    handlers: ProtocolHandlers,
    online: AtomicBool,
}

/// Shared broker connecting `MemoryOverlay` instances.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    nodes: Arc<DashMap<PeerId, Arc<Node>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node serving `handlers`. Rejoining replaces the old entry.
    pub fn join(&self, id: PeerId, handlers: ProtocolHandlers) -> MemoryOverlay {
        self.nodes.insert(
            id,
            Arc::new(Node {
                handlers,
                online: AtomicBool::new(true),
            }),
        );
        MemoryOverlay {
            id,
            network: self.clone(),
        }
    }

    /// Take a node off the network (or bring it back). Streams to an
    /// offline node fail to open.
    pub fn set_online(&self, id: &PeerId, online: bool) {
        if let Some(node) = self.nodes.get(id) {
            node.online.store(online, Ordering::SeqCst);
        }
    }

    pub fn leave(&self, id: &PeerId) {
        self.nodes.remove(id);
    }
}

/// One node's view of a `MemoryNetwork`.
#[derive(Clone)]
pub struct MemoryOverlay {
    id: PeerId,
    network: MemoryNetwork,
}

#[async_trait]
impl Overlay for MemoryOverlay {
    fn local_id(&self) -> PeerId {
        self.id
    }

    async fn open_stream(&self, peer: PeerId, protocol: &str) -> Result<BoxStream, OverlayError> {
        let node = self
            .network
            .nodes
            .get(&peer)
            .map(|n| n.value().clone())
            .ok_or(OverlayError::Unreachable(peer))?;
        if !node.online.load(Ordering::SeqCst) {
            return Err(OverlayError::Unreachable(peer));
        }
        if !node.handlers.supports(protocol) {
            return Err(OverlayError::UnsupportedProtocol(protocol.to_string()));
        }

        let (mine, theirs) = tokio::io::duplex(DUPLEX_BUF_SIZE);
        let inbound: BoxStream = Box::new(MemoryStream {
            io: theirs,
            remote: self.id,
        });
        let protocol = protocol.to_string();
        tokio::spawn(async move {
            node.handlers.dispatch(&protocol, inbound).await;
        });

        Ok(Box::new(MemoryStream {
            io: mine,
            remote: peer,
        }))
    }
}

/// One end of an in-memory stream.
pub struct MemoryStream {
    io: DuplexStream,
    remote: PeerId,
}

#[async_trait]
impl OverlayStream for MemoryStream {
    fn remote(&self) -> PeerId {
        self.remote
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), OverlayError> {
        self.io.write_all(buf).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), OverlayError> {
        self.io.shutdown().await?;
        Ok(())
    }

    async fn read_to_end(&mut self, limit: usize) -> Result<Vec<u8>, OverlayError> {
        let mut buf = Vec::new();
        (&mut self.io)
            .take(limit as u64 + 1)
            .read_to_end(&mut buf)
            .await?;
        if buf.len() > limit {
            return Err(OverlayError::TooLarge(limit));
        }
        Ok(buf)
    }
}
