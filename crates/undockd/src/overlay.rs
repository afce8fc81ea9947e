//! TCP overlay — Noise_XX authenticated streams between nodes.
//!
//! Every stream is its own TCP connection. Framing is a big-endian u16
//! length followed by that many bytes.
//!
//!   1. three handshake frames (msg1 → msg2 → msg3), plaintext Noise messages
//!   2. encrypted protocol id, initiator → responder
//!   3. encrypted one-byte ack (1 = served, 0 = unsupported), responder → initiator
//!   4. encrypted data frames in either direction; an encrypted empty frame
//!      ends that direction's message
//!
//! The initiator only keeps the stream if the responder proved the identity
//! it was asked to reach. The responder gives up on a request whose next
//! frame does not arrive within the read timeout.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

use undock_core::crypto::{
    CryptoError, Keypair, NoiseInitiator, NoiseResponder, NoiseTransport, MAX_PLAINTEXT,
};
use undock_core::PeerId;
use undock_services::{BoxStream, Overlay, OverlayError, OverlayStream, PeerTable, ProtocolHandlers};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest gap between request frames on an inbound stream.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

const ACK_SERVED: u8 = 1;
const ACK_UNSUPPORTED: u8 = 0;

pub struct TcpOverlay {
    keypair: Arc<Keypair>,
    peers: PeerTable,
    handlers: ProtocolHandlers,
    read_timeout: Duration,
}

impl TcpOverlay {
    pub fn new(keypair: Arc<Keypair>, peers: PeerTable, handlers: ProtocolHandlers) -> Self {
        Self {
            keypair,
            peers,
            handlers,
            read_timeout: READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Accept inbound streams until shutdown. One task per connection.
    pub async fn accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "overlay listening");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("overlay listener shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (tcp, addr) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "overlay accept failed");
                            continue;
                        }
                    };
                    let this = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = this.serve_inbound(tcp).await {
                            tracing::debug!(%addr, error = %e, "inbound overlay stream rejected");
                        }
                    });
                }
            }
        }
    }

    async fn serve_inbound(&self, mut tcp: TcpStream) -> Result<(), OverlayError> {
        let (mut transport, protocol) = timeout(HANDSHAKE_TIMEOUT, async {
            let mut transport = respond(&mut tcp, &self.keypair).await?;
            let frame = read_frame(&mut tcp).await?;
            let protocol = transport.decrypt(&frame).map_err(handshake_err)?;
            let protocol = String::from_utf8(protocol)
                .map_err(|_| OverlayError::Handshake("protocol id is not utf-8".into()))?;
            Ok::<_, OverlayError>((transport, protocol))
        })
        .await
        .map_err(|_| OverlayError::Handshake("timed out".into()))??;

        let remote = transport.remote();
        if !self.handlers.supports(&protocol) {
            let nack = transport.encrypt(&[ACK_UNSUPPORTED]).map_err(handshake_err)?;
            write_frame(&mut tcp, &nack).await?;
            return Err(OverlayError::UnsupportedProtocol(protocol));
        }
        let ack = transport.encrypt(&[ACK_SERVED]).map_err(handshake_err)?;
        write_frame(&mut tcp, &ack).await?;

        tracing::trace!(peer = %remote.short(), protocol, "inbound overlay stream");
        let stream: BoxStream =
            Box::new(NoiseStream::new(tcp, transport).with_read_timeout(self.read_timeout));
        self.handlers.dispatch(&protocol, stream).await;
        Ok(())
    }
}

#[async_trait]
impl Overlay for TcpOverlay {
    fn local_id(&self) -> PeerId {
        self.keypair.peer_id()
    }

    async fn open_stream(&self, peer: PeerId, protocol: &str) -> Result<BoxStream, OverlayError> {
        let addr = self
            .peers
            .addr_of(&peer)
            .ok_or(OverlayError::Unreachable(peer))?;
        let mut tcp = connect(addr, peer).await?;

        let mut transport = timeout(HANDSHAKE_TIMEOUT, initiate(&mut tcp, &self.keypair))
            .await
            .map_err(|_| OverlayError::Handshake("timed out".into()))??;
        if transport.remote() != peer {
            return Err(OverlayError::Handshake(format!(
                "expected {} but {} answered",
                peer.short(),
                transport.remote().short()
            )));
        }

        let frame = transport
            .encrypt(protocol.as_bytes())
            .map_err(handshake_err)?;
        write_frame(&mut tcp, &frame).await?;
        let ack = timeout(HANDSHAKE_TIMEOUT, read_frame(&mut tcp))
            .await
            .map_err(|_| OverlayError::Handshake("timed out".into()))??;
        match transport.decrypt(&ack).map_err(handshake_err)?.as_slice() {
            [ACK_SERVED] => Ok(Box::new(NoiseStream::new(tcp, transport))),
            _ => Err(OverlayError::UnsupportedProtocol(protocol.to_string())),
        }
    }
}

async fn connect(addr: SocketAddr, peer: PeerId) -> Result<TcpStream, OverlayError> {
    match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(tcp)) => {
            tcp.set_nodelay(true)?;
            Ok(tcp)
        }
        Ok(Err(e)) => {
            tracing::debug!(peer = %peer.short(), %addr, error = %e, "overlay connect failed");
            Err(OverlayError::Unreachable(peer))
        }
        Err(_) => Err(OverlayError::Unreachable(peer)),
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────────

async fn initiate(tcp: &mut TcpStream, keypair: &Keypair) -> Result<NoiseTransport, OverlayError> {
    let (initiator, msg1) = NoiseInitiator::new(keypair).map_err(handshake_err)?;
    write_frame(tcp, &msg1).await?;
    let msg2 = read_frame(tcp).await?;
    let (transport, msg3) = initiator.finish(&msg2).map_err(handshake_err)?;
    write_frame(tcp, &msg3).await?;
    Ok(transport)
}

async fn respond(tcp: &mut TcpStream, keypair: &Keypair) -> Result<NoiseTransport, OverlayError> {
    let responder = NoiseResponder::new(keypair).map_err(handshake_err)?;
    let msg1 = read_frame(tcp).await?;
    let (pending, msg2) = responder.respond(&msg1).map_err(handshake_err)?;
    write_frame(tcp, &msg2).await?;
    let msg3 = read_frame(tcp).await?;
    pending.finish(&msg3).map_err(handshake_err)
}

fn handshake_err(e: CryptoError) -> OverlayError {
    OverlayError::Handshake(e.to_string())
}

// ── Framing ───────────────────────────────────────────────────────────────────

async fn write_frame(tcp: &mut TcpStream, frame: &[u8]) -> Result<(), OverlayError> {
    let len = u16::try_from(frame.len()).map_err(|_| OverlayError::TooLarge(u16::MAX as usize))?;
    let mut buf = Vec::with_capacity(2 + frame.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(frame);
    tcp.write_all(&buf).await?;
    Ok(())
}

async fn read_frame(tcp: &mut TcpStream) -> Result<Vec<u8>, OverlayError> {
    let mut len = [0u8; 2];
    tcp.read_exact(&mut len).await.map_err(eof_is_closed)?;
    let mut frame = vec![0u8; u16::from_be_bytes(len) as usize];
    tcp.read_exact(&mut frame).await.map_err(eof_is_closed)?;
    Ok(frame)
}

fn eof_is_closed(e: std::io::Error) -> OverlayError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        OverlayError::Closed
    } else {
        OverlayError::Io(e)
    }
}

// ── Stream ────────────────────────────────────────────────────────────────────

struct NoiseStream {
    tcp: TcpStream,
    transport: NoiseTransport,
    finished: bool,
    /// Per-frame read deadline. Outbound streams wait on a workload and have none.
    read_timeout: Option<Duration>,
}

impl NoiseStream {
    fn new(tcp: TcpStream, transport: NoiseTransport) -> Self {
        Self {
            tcp,
            transport,
            finished: false,
            read_timeout: None,
        }
    }

    fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = Some(read_timeout);
        self
    }

    async fn next_frame(&mut self) -> Result<Vec<u8>, OverlayError> {
        match self.read_timeout {
            Some(limit) => timeout(limit, read_frame(&mut self.tcp))
                .await
                .map_err(|_| OverlayError::TimedOut)?,
            None => read_frame(&mut self.tcp).await,
        }
    }
}

#[async_trait]
impl OverlayStream for NoiseStream {
    fn remote(&self) -> PeerId {
        self.transport.remote()
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), OverlayError> {
        if self.finished {
            return Err(OverlayError::Closed);
        }
        for chunk in buf.chunks(MAX_PLAINTEXT) {
            let frame = self.transport.encrypt(chunk).map_err(handshake_err)?;
            write_frame(&mut self.tcp, &frame).await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), OverlayError> {
        if self.finished {
            return Ok(());
        }
        let frame = self.transport.encrypt(&[]).map_err(handshake_err)?;
        write_frame(&mut self.tcp, &frame).await?;
        self.tcp.flush().await?;
        self.finished = true;
        Ok(())
    }

    async fn read_to_end(&mut self, limit: usize) -> Result<Vec<u8>, OverlayError> {
        let mut out = Vec::new();
        loop {
            let frame = self.next_frame().await?;
            let plain = self.transport.decrypt(&frame).map_err(handshake_err)?;
            if plain.is_empty() {
                return Ok(out);
            }
            if out.len() + plain.len() > limit {
                return Err(OverlayError::TooLarge(limit));
            }
            out.extend_from_slice(&plain);
        }
    }
}
