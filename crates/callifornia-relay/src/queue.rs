//! Blocking FIFO shared between packet producers and the sender thread.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;

use callifornia_core::PacketType;

/// One packet addressed to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPacket {
    /// Chunk id. Random unless the caller needs a specific one.
    pub id: u64,
    pub packet_type: PacketType,
    pub payload: Bytes,
    pub destination: SocketAddr,
    /// Already a complete datagram; send as is.
    pub raw_datagram: bool,
}

impl OutgoingPacket {
    pub fn new(packet_type: PacketType, payload: impl Into<Bytes>, destination: SocketAddr) -> Self {
        Self {
            id: rand::random(),
            packet_type,
            payload: payload.into(),
            destination,
            raw_datagram: false,
        }
    }

    /// Forward a datagram verbatim, e.g. a media chunk relayed unchanged.
    pub fn raw(datagram: impl Into<Bytes>, destination: SocketAddr) -> Self {
        Self {
            id: 0,
            packet_type: PacketType::Voice,
            payload: datagram.into(),
            destination,
            raw_datagram: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct OutgoingPacketQueue {
    packets: Mutex<VecDeque<OutgoingPacket>>,
    ready: Condvar,
}

impl OutgoingPacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, packet: OutgoingPacket) {
        self.lock().push_back(packet);
        self.ready.notify_one();
    }

    /// Pop the oldest packet, waiting up to `timeout` for one to arrive.
    pub fn try_pop(&self, timeout: Duration) -> Option<OutgoingPacket> {
        let deadline = Instant::now() + timeout;
        let mut packets = self.lock();
        loop {
            if let Some(packet) = packets.pop_front() {
                return Some(packet);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            packets = match self.ready.wait_timeout(packets, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<OutgoingPacket>> {
        self.packets.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn addr() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    #[test]
    fn fifo_order() {
        let queue = OutgoingPacketQueue::new();
        queue.push(OutgoingPacket::new(PacketType::Ping, Bytes::new(), addr()));
        queue.push(OutgoingPacket::new(PacketType::LogoutOk, Bytes::new(), addr()));
        assert_eq!(queue.len(), 2);

        let first = queue.try_pop(Duration::ZERO).unwrap();
        let second = queue.try_pop(Duration::ZERO).unwrap();
        assert_eq!(first.packet_type, PacketType::Ping);
        assert_eq!(second.packet_type, PacketType::LogoutOk);
        assert!(queue.is_empty());
    }

    #[test]
    fn empty_pop_times_out() {
        let queue = OutgoingPacketQueue::new();
        let started = Instant::now();
        assert!(queue.try_pop(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn pop_wakes_on_push() {
        let queue = Arc::new(OutgoingPacketQueue::new());
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(OutgoingPacket::raw(vec![1, 2, 3], addr()));
        });

        let packet = queue.try_pop(Duration::from_secs(5)).unwrap();
        assert!(packet.raw_datagram);
        assert_eq!(&packet.payload[..], &[1, 2, 3]);
        handle.join().unwrap();
    }
}
