//! Link-local multicast gossip.
//!
//! Every published message goes out as one UDP datagram to ff02::1 on the
//! configured interface. A datagram is the topic name, a newline, then the
//! payload. Received datagrams fan out to that topic's subscribers with the
//! sender's address attached.

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use undock_core::wire::MULTICAST_ADDR;
use undock_services::gossip::TOPIC_CAPACITY;
use undock_services::{Gossip, GossipError, GossipMessage};

/// Largest datagram we send or accept: an IPv6 UDP payload without jumbograms.
const MAX_DATAGRAM: usize = 65_000;

pub struct UdpGossip {
    send: UdpSocket,
    recv: UdpSocket,
    dest: SocketAddrV6,
    topics: DashMap<String, broadcast::Sender<GossipMessage>>,
}

impl UdpGossip {
    /// Open the send and receive sockets on `interface_index`, listening on `port`.
    pub fn bind(interface_index: u32, port: u16) -> Result<Self> {
        let send = make_multicast_socket(interface_index)
            .context("failed to create multicast send socket")?;
        let recv = make_listener_socket(interface_index, port)
            .context("failed to create multicast listener socket")?;

        let multicast: Ipv6Addr = MULTICAST_ADDR.parse().context("multicast address")?;
        Ok(Self {
            send: UdpSocket::from_std(send).context("failed to convert to tokio UdpSocket")?,
            recv: UdpSocket::from_std(recv).context("failed to convert to tokio UdpSocket")?,
            dest: SocketAddrV6::new(multicast, port, 0, interface_index),
            topics: DashMap::new(),
        })
    }

    /// Deliver received datagrams to subscribers until shutdown.
    pub async fn recv_loop(
        self: std::sync::Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        tracing::info!(port = self.dest.port(), "gossip listener starting");

        loop {
            let (len, source) = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("gossip listener shutting down");
                    return Ok(());
                }
                r = self.recv.recv_from(&mut buf) => match r {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "recv_from failed");
                        continue;
                    }
                },
            };

            let Some((topic, data)) = split_datagram(&buf[..len]) else {
                tracing::trace!(%source, "malformed gossip datagram");
                continue;
            };
            // No subscriber on the topic means nobody is interested.
            if let Some(tx) = self.topics.get(topic) {
                let _ = tx.send(GossipMessage {
                    source: Some(source),
                    data: Bytes::copy_from_slice(data),
                });
            }
        }
    }
}

#[async_trait]
impl Gossip for UdpGossip {
    async fn publish(&self, topic: &str, data: Bytes) -> Result<(), GossipError> {
        let datagram = join_datagram(topic, &data);
        if datagram.len() > MAX_DATAGRAM {
            return Err(GossipError::TooLarge(datagram.len()));
        }
        let n = self
            .send
            .send_to(&datagram, SocketAddr::V6(self.dest))
            .await?;
        tracing::trace!(topic, bytes = n, "gossip sent");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<GossipMessage>, GossipError> {
        let tx = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        Ok(tx.subscribe())
    }
}

fn join_datagram(topic: &str, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(topic.len() + 1 + data.len());
    out.extend_from_slice(topic.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(data);
    out
}

fn split_datagram(datagram: &[u8]) -> Option<(&str, &[u8])> {
    let nl = datagram.iter().position(|b| *b == b'\n')?;
    let topic = std::str::from_utf8(&datagram[..nl]).ok()?;
    if topic.is_empty() {
        return None;
    }
    Some((topic, &datagram[nl + 1..]))
}

// ── Sockets ───────────────────────────────────────────────────────────────────

fn make_multicast_socket(interface_index: u32) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_multicast_if_v6(interface_index).context("IPV6_MULTICAST_IF")?;
    // link-local only
    socket.set_multicast_hops_v6(1).context("IPV6_MULTICAST_HOPS")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;

    Ok(socket.into())
}

fn make_listener_socket(interface_index: u32, port: u16) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_only_v6(true).context("IPV6_V6ONLY")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;

    let multicast: Ipv6Addr = MULTICAST_ADDR.parse().context("multicast address")?;
    socket
        .join_multicast_v6(&multicast, interface_index)
        .context("IPV6_JOIN_GROUP")?;

    Ok(socket.into())
}

/// Get the OS interface index for a named network interface.
/// Returns an error if the interface does not exist.
pub fn if_index(name: &str) -> Result<u32> {
    let name_cstr = std::ffi::CString::new(name).context("interface name contains null byte")?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        anyhow::bail!("interface '{}' not found", name);
    }
    Ok(index)
}
