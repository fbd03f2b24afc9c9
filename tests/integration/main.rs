//! End-to-end tests: real `CallsClient`s talking to each other through an
//! in-process relay on loopback.
//!
//! Every test spins up its own relay, so tests are independent and may run
//! in parallel. Keys are 1024-bit to keep generation quick.

mod calls;
mod relay;
mod sessions;
mod sharing;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::mpsc;

use callifornia_client::{AudioEngine, CallsClient, ClientEvent};
use callifornia_core::CallsConfig;

pub use relay::FakeRelay;

/// Upper bound on any single expected event.
pub const WAIT: Duration = Duration::from_secs(20);

pub fn test_config(relay: SocketAddr) -> CallsConfig {
    let mut config = CallsConfig::default();
    config.server.host = relay.ip().to_string();
    config.server.port = relay.port();
    config.crypto.rsa_key_bits = 1024;
    config.transport.socket_buffer_size = 0;
    config.timing.task_retry_interval_ms = 500;
    config
}

// ── Audio ─────────────────────────────────────────────────────────────────────

/// Keeps every frame it is asked to play.
#[derive(Default)]
pub struct RecordingAudio {
    streaming: AtomicBool,
    muted: AtomicBool,
    volume: AtomicU8,
    played: Mutex<Vec<Vec<u8>>>,
}

impl RecordingAudio {
    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().unwrap().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }
}

impl AudioEngine for RecordingAudio {
    fn start_stream(&self) {
        self.streaming.store(true, Ordering::SeqCst);
    }

    fn stop_stream(&self) {
        self.streaming.store(false, Ordering::SeqCst);
    }

    fn play_audio(&self, frame: &[u8]) {
        self.played.lock().unwrap().push(frame.to_vec());
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    fn set_volume(&self, volume: u8) {
        self.volume.store(volume, Ordering::SeqCst);
    }

    fn volume(&self) -> u8 {
        self.volume.load(Ordering::SeqCst)
    }
}

// ── Peers ─────────────────────────────────────────────────────────────────────

/// One client plus the events it has emitted.
pub struct Peer {
    pub client: CallsClient,
    pub audio: Arc<RecordingAudio>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
}

impl Peer {
    pub async fn start(config: CallsConfig) -> Result<Self> {
        let (tx, events) = mpsc::unbounded_channel();
        let audio = Arc::new(RecordingAudio::default());
        let engine: Arc<dyn AudioEngine> = audio.clone();
        let client = CallsClient::start(
            config,
            move |event: ClientEvent| {
                let _ = tx.send(event);
            },
            engine,
        )
        .await?;
        Ok(Self {
            client,
            audio,
            events,
        })
    }

    /// Start a client on `relay` and authorize it as `nickname`.
    pub async fn login(relay: &FakeRelay, nickname: &str) -> Result<Self> {
        Self::login_with(test_config(relay.addr()), nickname).await
    }

    pub async fn login_with(config: CallsConfig, nickname: &str) -> Result<Self> {
        let mut peer = Self::start(config).await?;
        peer.client.authorize(nickname)?;
        let event = peer
            .next(|e| matches!(e, ClientEvent::AuthorizationResult(_)))
            .await?;
        if event != ClientEvent::AuthorizationResult(Ok(())) {
            bail!("{nickname} not authorized: {event:?}");
        }
        Ok(peer)
    }

    /// Wait for the first event matching `pick`, discarding the ones before it.
    pub async fn next(&mut self, mut pick: impl FnMut(&ClientEvent) -> bool) -> Result<ClientEvent> {
        let wait = async {
            while let Some(event) = self.events.recv().await {
                if pick(&event) {
                    return Some(event);
                }
            }
            None
        };
        match tokio::time::timeout(WAIT, wait).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => bail!("event stream closed"),
            Err(_) => bail!("timed out waiting for event"),
        }
    }

    /// Wait for exactly `expected`.
    pub async fn expect(&mut self, expected: ClientEvent) -> Result<()> {
        self.next(|e| *e == expected).await.map(|_| ())
    }

    pub async fn stop(self) -> Result<()> {
        self.client.stop().await
    }
}

/// `caller` calls `callee` and `callee` picks up.
pub async fn establish(caller: &mut Peer, callee: &mut Peer, caller_name: &str, callee_name: &str) -> Result<()> {
    caller.client.start_calling(callee_name)?;
    callee
        .expect(ClientEvent::IncomingCall {
            nickname: caller_name.to_string(),
        })
        .await?;
    callee.client.accept_call(caller_name)?;
    caller.expect(ClientEvent::CallingAccepted).await?;
    callee
        .expect(ClientEvent::AcceptCallResult {
            nickname: caller_name.to_string(),
            result: Ok(()),
        })
        .await?;
    Ok(())
}

/// Poll `check` until it holds or `WAIT` runs out.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
