//! UDP transport to the relay.
//!
//! One connected socket, one send task that splits packets into datagrams,
//! one receive task that reassembles them. Everything above this layer sees
//! whole typed packets only.

pub mod receive;
pub mod send;

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use callifornia_core::{CallsConfig, PacketType};

pub use receive::receive_loop;
pub use send::SendWorker;

/// A logical packet waiting to be split and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPacket {
    pub packet_type: PacketType,
    pub payload: Bytes,
}

impl OutgoingPacket {
    pub fn new(packet_type: PacketType, payload: impl Into<Bytes>) -> Self {
        Self {
            packet_type,
            payload: payload.into(),
        }
    }
}

/// A reassembled packet of a known type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    pub packet_type: PacketType,
    pub payload: Bytes,
}

/// Handle for queueing outbound packets. Never blocks.
#[derive(Debug, Clone)]
pub struct PacketSender {
    tx: mpsc::UnboundedSender<OutgoingPacket>,
}

impl PacketSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutgoingPacket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn from_channel(tx: mpsc::UnboundedSender<OutgoingPacket>) -> Self {
        Self { tx }
    }

    pub fn send(&self, packet: OutgoingPacket) {
        let ty = packet.packet_type;
        if self.tx.send(packet).is_err() {
            tracing::trace!(packet_type = ?ty, "transport stopped, packet dropped");
        }
    }
}

/// The connected relay socket.
pub struct Transport {
    socket: Arc<UdpSocket>,
    relay: SocketAddr,
}

impl Transport {
    /// Resolve the relay and open a connected, non-blocking UDP socket.
    pub async fn connect(config: &CallsConfig) -> Result<Self> {
        let host = config.server.host.as_str();
        let port = config.server.port;
        let relay = tokio::net::lookup_host((host, port))
            .await
            .with_context(|| format!("failed to resolve {host}:{port}"))?
            .next()
            .with_context(|| format!("{host}:{port} resolved to no addresses"))?;

        let socket = make_socket(relay, config.transport.socket_buffer_size)?;
        let socket = UdpSocket::from_std(socket.into()).context("tokio UdpSocket")?;
        socket
            .connect(relay)
            .await
            .with_context(|| format!("connect to relay {relay}"))?;

        tracing::info!(%relay, local = ?socket.local_addr().ok(), "transport connected");

        Ok(Self {
            socket: Arc::new(socket),
            relay,
        })
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    pub fn relay_addr(&self) -> SocketAddr {
        self.relay
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

fn make_socket(relay: SocketAddr, buffer_size: usize) -> Result<Socket> {
    let socket = Socket::new(Domain::for_address(relay), Type::DGRAM, Some(Protocol::UDP))
        .context("socket()")?;

    if buffer_size > 0 {
        if let Err(e) = socket.set_recv_buffer_size(buffer_size) {
            tracing::warn!(error = %e, buffer_size, "SO_RCVBUF not applied");
        }
        if let Err(e) = socket.set_send_buffer_size(buffer_size) {
            tracing::warn!(error = %e, buffer_size, "SO_SNDBUF not applied");
        }
    }
    socket.set_nonblocking(true).context("O_NONBLOCK")?;

    let local: SocketAddr = if relay.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    socket.bind(&local.into()).context("bind ephemeral port")?;

    Ok(socket)
}

/// Errors that only mean the relay is not there right now.
pub(crate) fn is_benign(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused | ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable
    )
}
