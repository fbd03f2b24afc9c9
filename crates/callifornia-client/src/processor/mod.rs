//! Routes inbound packets to handlers by packet type.

mod control;
mod media;
mod peer;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use callifornia_core::PacketType;

use crate::client_core::ClientCore;
use crate::liveness::LivenessEdge;
use crate::transport::InboundPacket;

pub type Handler = fn(&ClientCore, &[u8]) -> anyhow::Result<()>;

/// Maps packet types to handlers.
pub struct PacketProcessor {
    handlers: HashMap<PacketType, Handler>,
}

impl Default for PacketProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketProcessor {
    pub fn new() -> Self {
        let mut processor = Self {
            handlers: HashMap::new(),
        };
        control::register(&mut processor);
        peer::register(&mut processor);
        media::register(&mut processor);
        processor
    }

    pub fn register(&mut self, packet_type: PacketType, handler: Handler) {
        self.handlers.insert(packet_type, handler);
    }

    /// Run the handler for one packet. False if none is registered.
    pub fn dispatch(&self, core: &ClientCore, packet_type: PacketType, payload: &[u8]) -> bool {
        let Some(handler) = self.handlers.get(&packet_type) else {
            return false;
        };

        if packet_type.is_peer_request() && !core.state.lock().is_authorized() {
            tracing::debug!(?packet_type, "peer packet while unauthorized, ignored");
            return true;
        }

        if let Err(e) = handler(core, payload) {
            tracing::warn!(?packet_type, error = %e, "packet handling failed");
        }
        true
    }
}

/// Drains inbound packets and liveness edges on one task, so handlers never
/// race each other.
pub struct Dispatcher {
    core: Arc<ClientCore>,
    processor: PacketProcessor,
    inbound_rx: mpsc::UnboundedReceiver<InboundPacket>,
    edges_rx: mpsc::UnboundedReceiver<LivenessEdge>,
    shutdown: broadcast::Receiver<()>,
}

impl Dispatcher {
    pub fn new(
        core: Arc<ClientCore>,
        processor: PacketProcessor,
        inbound_rx: mpsc::UnboundedReceiver<InboundPacket>,
        edges_rx: mpsc::UnboundedReceiver<LivenessEdge>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            core,
            processor,
            inbound_rx,
            edges_rx,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!("dispatcher shutting down");
                    return Ok(());
                }

                Some(edge) = self.edges_rx.recv() => match edge {
                    LivenessEdge::Down => self.core.on_connection_down().await,
                    LivenessEdge::Restored => self.core.on_connection_restored(),
                },

                packet = self.inbound_rx.recv() => {
                    let Some(packet) = packet else {
                        tracing::debug!("receive loop gone, dispatcher exiting");
                        return Ok(());
                    };
                    if !self.processor.dispatch(&self.core, packet.packet_type, &packet.payload) {
                        tracing::debug!(packet_type = ?packet.packet_type, "no handler, packet dropped");
                    }
                }
            }
        }
    }
}
