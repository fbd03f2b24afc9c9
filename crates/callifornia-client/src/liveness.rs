//! Relay liveness: periodic pings and a failure counter.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

use callifornia_core::PacketType;

use crate::transport::{OutgoingPacket, PacketSender};

/// A change in connection health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessEdge {
    Down,
    Restored,
}

#[derive(Debug, Default)]
struct Counters {
    success: bool,
    failures: u32,
    down: bool,
}

/// Tracks PING_SUCCESS arrivals between checks.
#[derive(Debug)]
pub struct LivenessMonitor {
    counters: Mutex<Counters>,
    max_failures: u32,
}

impl LivenessMonitor {
    pub fn new(max_failures: u32) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            max_failures: max_failures.max(1),
        }
    }

    pub fn record_success(&self) {
        self.lock().success = true;
    }

    /// Close the current check window.
    ///
    /// Returns `Down` exactly once when consecutive failures reach the
    /// threshold, and `Restored` on the first success after that.
    pub fn evaluate(&self) -> Option<LivenessEdge> {
        let mut c = self.lock();
        if std::mem::take(&mut c.success) {
            c.failures = 0;
            if std::mem::take(&mut c.down) {
                return Some(LivenessEdge::Restored);
            }
            return None;
        }

        c.failures = c.failures.saturating_add(1);
        if c.failures == self.max_failures && !c.down {
            c.down = true;
            return Some(LivenessEdge::Down);
        }
        None
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().failures
    }

    pub fn is_down(&self) -> bool {
        self.lock().down
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Sends PINGs and evaluates the monitor on a slower cadence.
pub struct PingWorker {
    sender: PacketSender,
    monitor: Arc<LivenessMonitor>,
    ping_interval: Duration,
    check_interval: Duration,
    edges: mpsc::UnboundedSender<LivenessEdge>,
    shutdown: broadcast::Receiver<()>,
}

impl PingWorker {
    pub fn new(
        sender: PacketSender,
        monitor: Arc<LivenessMonitor>,
        ping_interval: Duration,
        check_interval: Duration,
        edges: mpsc::UnboundedSender<LivenessEdge>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            sender,
            monitor,
            ping_interval,
            check_interval,
            edges,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut ping = tokio::time::interval(self.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let start = tokio::time::Instant::now() + self.check_interval;
        let mut check = tokio::time::interval_at(start, self.check_interval);
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!("ping worker shutting down");
                    return Ok(());
                }

                _ = ping.tick() => {
                    self.sender.send(OutgoingPacket::new(PacketType::Ping, Bytes::new()));
                }

                _ = check.tick() => {
                    if let Some(edge) = self.monitor.evaluate() {
                        match edge {
                            LivenessEdge::Down => tracing::warn!(
                                failures = self.monitor.consecutive_failures(),
                                "relay unreachable"
                            ),
                            LivenessEdge::Restored => tracing::info!("relay reachable again"),
                        }
                        if self.edges.send(edge).is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
