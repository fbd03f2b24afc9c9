use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use callifornia_core::{PacketType, Reassembler};

use super::{is_benign, InboundPacket};

pub async fn receive_loop(
    socket: Arc<UdpSocket>,
    inbound_tx: mpsc::UnboundedSender<InboundPacket>,
    assembly_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut buf = vec![0u8; 65536];
    let mut reassembler = Reassembler::new(assembly_timeout);

    let mut backoff = Backoff::default();

    loop {
        let result = tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("receive loop shutting down");
                return Ok(());
            }

            result = socket.recv(&mut buf) => result,
        };

        let len = match result {
            Ok(len) => {
                backoff.reset();
                len
            }
            Err(e) if is_benign(&e) => {
                tracing::debug!(error = %e, "relay unreachable");
                continue;
            }
            Err(e) => {
                let delay = backoff.failed();
                tracing::warn!(error = %e, ?delay, "recv failed");
                tokio::select! {
                    _ = shutdown.recv() => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }
        };

        let packet = match reassembler.push(&buf[..len]) {
            Ok(Some(p)) => p,
            Ok(None) => continue,
            Err(e) => {
                tracing::trace!(error = %e, len, "datagram discarded");
                continue;
            }
        };

        let packet_type = match PacketType::try_from(packet.packet_type) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, packet_id = packet.packet_id, "unknown packet type");
                continue;
            }
        };

        tracing::trace!(
            packet_id = packet.packet_id,
            ?packet_type,
            payload_len = packet.payload.len(),
            "packet received"
        );

        let inbound = InboundPacket {
            packet_type,
            payload: Bytes::from(packet.payload),
        };
        if inbound_tx.send(inbound).is_err() {
            tracing::debug!("dispatcher gone, receive loop exiting");
            return Ok(());
        }
    }
}

/// Delay after consecutive failed receives, doubling up to a cap.
#[derive(Debug, Default)]
struct Backoff {
    failures: u32,
}

impl Backoff {
    const BASE: Duration = Duration::from_millis(10);
    const MAX: Duration = Duration::from_secs(1);

    fn failed(&mut self) -> Duration {
        let delay = Self::BASE
            .saturating_mul(1 << self.failures.min(7))
            .min(Self::MAX);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}
