//! Sender thread: drains the outgoing queue onto the relay socket.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use callifornia_core::codec;
use callifornia_core::wire::DEFAULT_MAX_DATAGRAM;

use crate::queue::{OutgoingPacket, OutgoingPacketQueue};

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub max_datagram_size: usize,
    /// Longest the thread blocks on an empty queue before rechecking for stop.
    pub poll_interval: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_datagram_size: DEFAULT_MAX_DATAGRAM,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Called with the destination of a datagram that failed for a reason other
/// than the client simply being gone.
pub type ErrorCallback = Box<dyn Fn(SocketAddr, &io::Error) + Send + 'static>;

pub struct ServerPacketSender {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServerPacketSender {
    pub fn start<F>(
        socket: Arc<UdpSocket>,
        queue: Arc<OutgoingPacketQueue>,
        config: SenderConfig,
        on_error: F,
    ) -> io::Result<Self>
    where
        F: Fn(SocketAddr, &io::Error) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let on_error: ErrorCallback = Box::new(on_error);

        let thread = std::thread::Builder::new()
            .name("callifornia-relay-sender".into())
            .spawn(move || {
                tracing::debug!(max_datagram = config.max_datagram_size, "relay sender started");
                while flag.load(Ordering::Acquire) {
                    if let Some(packet) = queue.try_pop(config.poll_interval) {
                        transmit(&socket, &packet, config.max_datagram_size, &on_error);
                    }
                }
                tracing::debug!(pending = queue.len(), "relay sender stopped");
            })?;

        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop and join the thread. Packets still queued are left in the queue.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("relay sender thread panicked");
            }
        }
    }
}

impl Drop for ServerPacketSender {
    fn drop(&mut self) {
        self.stop();
    }
}

fn transmit(socket: &UdpSocket, packet: &OutgoingPacket, max_datagram: usize, on_error: &ErrorCallback) {
    if packet.raw_datagram {
        send_one(socket, &packet.payload, packet.destination, on_error);
        return;
    }

    let datagrams = match codec::split(packet.id, packet.packet_type.into(), &packet.payload, max_datagram) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, packet_type = ?packet.packet_type, "packet not sendable");
            return;
        }
    };
    for datagram in &datagrams {
        if !send_one(socket, datagram, packet.destination, on_error) {
            return;
        }
    }
}

fn send_one(socket: &UdpSocket, datagram: &[u8], destination: SocketAddr, on_error: &ErrorCallback) -> bool {
    match socket.send_to(datagram, destination) {
        Ok(_) => true,
        Err(e) if is_benign(&e) => {
            tracing::debug!(error = %e, %destination, "client unreachable, datagram dropped");
            false
        }
        Err(e) => {
            tracing::error!(error = %e, %destination, "send_to failed");
            on_error(destination, &e);
            false
        }
    }
}

/// Errors that mean the client went away or the kernel is briefly out of
/// buffers. Neither is worth surfacing.
pub fn is_benign(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    ) || e.raw_os_error() == Some(libc::ENOBUFS)
}
