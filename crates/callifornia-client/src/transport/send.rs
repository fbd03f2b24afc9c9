//! Send worker: dequeues packets, splits, transmits.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use callifornia_core::codec;

use super::{is_benign, OutgoingPacket};

pub struct SendWorker {
    socket: Arc<UdpSocket>,
    max_datagram: usize,
    packet_rx: mpsc::UnboundedReceiver<OutgoingPacket>,
    shutdown: broadcast::Receiver<()>,
}

impl SendWorker {
    pub fn new(
        socket: Arc<UdpSocket>,
        max_datagram: usize,
        packet_rx: mpsc::UnboundedReceiver<OutgoingPacket>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            max_datagram,
            packet_rx,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!("send worker shutting down");
                    return Ok(());
                }

                packet = self.packet_rx.recv() => {
                    let Some(packet) = packet else {
                        tracing::debug!("packet sender dropped, send worker exiting");
                        return Ok(());
                    };
                    self.transmit(packet).await;
                }
            }
        }
    }

    async fn transmit(&self, packet: OutgoingPacket) {
        let packet_id = rand::random::<u64>();
        let datagrams = match codec::split(
            packet_id,
            packet.packet_type.into(),
            &packet.payload,
            self.max_datagram,
        ) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, packet_type = ?packet.packet_type, "packet not sendable");
                return;
            }
        };

        for datagram in &datagrams {
            if let Err(e) = self.socket.send(datagram).await {
                if is_benign(&e) {
                    tracing::debug!(error = %e, "relay unreachable, datagram dropped");
                } else {
                    tracing::warn!(error = %e, packet_type = ?packet.packet_type, "send failed");
                }
                return;
            }
        }

        tracing::trace!(
            packet_id,
            packet_type = ?packet.packet_type,
            payload_len = packet.payload.len(),
            chunks = datagrams.len(),
            "packet sent"
        );
    }
}
