//! `CallsClient`: the application-facing facade.
//!
//! Every verb checks state synchronously and returns a `CallError` without
//! side effects when it does not apply. Outcomes that depend on the network
//! arrive later as `ClientEvent`s on the listener thread.

use std::sync::{Arc, Weak};

use anyhow::Context;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use callifornia_core::crypto::{self, aes_stream_encrypt, hash};
use callifornia_core::packet::{Logout, Signal};
use callifornia_core::{CallsConfig, PacketType};

use crate::audio::AudioEngine;
use crate::client_core::{ClientCore, Stream};
use crate::event::{ClientEvent, EventDrain, EventListener, RequestError};
use crate::liveness::PingWorker;
use crate::processor::{Dispatcher, PacketProcessor};
use crate::state::{Accepted, CallError, ClientState, Replaced, Sharing};
use crate::transport::{receive_loop, PacketSender, SendWorker, Transport};

pub struct CallsClient {
    core: Arc<ClientCore>,
    shutdown: broadcast::Sender<()>,
    workers: Vec<JoinHandle<anyhow::Result<()>>>,
    drain: Option<EventDrain>,
}

/// What `start_calling` turned into.
enum Dial {
    Accept(String, Accepted),
    Calling,
}

impl CallsClient {
    /// Connect to the relay and start the background workers.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start<L: EventListener>(
        config: CallsConfig,
        listener: L,
        audio: Arc<dyn AudioEngine>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        audio.set_volume(config.audio.volume);
        audio.set_muted(config.audio.muted);

        let transport = Transport::connect(&config).await?;
        let (events, drain) = EventDrain::spawn(listener).context("failed to spawn event thread")?;

        let (sender, packet_rx) = PacketSender::channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (edges_tx, edges_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = broadcast::channel::<()>(1);

        let core = ClientCore::new(config.clone(), Handle::current(), sender.clone(), events, audio);

        let workers = vec![
            tokio::spawn(
                SendWorker::new(
                    transport.socket(),
                    config.transport.max_datagram_size,
                    packet_rx,
                    shutdown.subscribe(),
                )
                .run(),
            ),
            tokio::spawn(receive_loop(
                transport.socket(),
                inbound_tx,
                config.transport.assembly_timeout(),
                shutdown.subscribe(),
            )),
            tokio::spawn(
                PingWorker::new(
                    sender,
                    core.liveness.clone(),
                    config.timing.ping_interval(),
                    config.timing.ping_check_interval(),
                    edges_tx,
                    shutdown.subscribe(),
                )
                .run(),
            ),
            tokio::spawn(
                Dispatcher::new(
                    core.clone(),
                    PacketProcessor::new(),
                    inbound_rx,
                    edges_rx,
                    shutdown.subscribe(),
                )
                .run(),
            ),
        ];

        tracing::info!(relay = %transport.relay_addr(), "client started");

        Ok(Self {
            core,
            shutdown,
            workers,
            drain: Some(drain),
        })
    }

    /// Stop every worker. Events queued before this call are still
    /// delivered; none are delivered after it returns.
    pub async fn stop(mut self) -> anyhow::Result<()> {
        self.core.tasks.cancel_all();
        let teardown = self.core.state.with(|s| s.reset());
        if teardown.active.is_some() {
            self.core.audio.stop_stream();
        }
        drop(teardown);

        let _ = self.shutdown.send(());
        for worker in self.workers.drain(..) {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "worker exited with error"),
                Err(e) => tracing::warn!(error = %e, "worker panicked"),
            }
        }

        if let Some(drain) = self.drain.take() {
            tokio::task::spawn_blocking(move || drain.stop())
                .await
                .context("event thread join failed")?;
        }
        tracing::info!("client stopped");
        Ok(())
    }

    // ── Session ──────────────────────────────────────────────────────────────

    /// Register `nickname` with the relay. Generates keys first if needed.
    pub fn authorize(&self, nickname: &str) -> Result<(), CallError> {
        if nickname.trim().is_empty() {
            return Err(CallError::InvalidNickname);
        }
        self.core.state.with(|s| s.begin_authorization(nickname))?;
        self.core.keys.generate_keys();
        self.core
            .runtime
            .spawn(self.core.clone().send_authorization(nickname.to_string()));
        Ok(())
    }

    /// Leave the relay. Pending offers are declined and any call is ended
    /// without waiting for the peer.
    pub fn logout(&self) -> Result<(), CallError> {
        let core = &self.core;
        let (me, teardown) = core.state.with(|s| {
            let me = s.nickname().map(hash).ok_or(CallError::NotAuthorized)?;
            Ok::<_, CallError>((me, s.reset()))
        })?;
        core.tasks.cancel_all();
        if !core.keys.try_reset() {
            let keys = core.keys.clone();
            core.runtime.spawn(async move { keys.reset().await });
        }

        let pending_callers: Vec<String> = teardown
            .incoming
            .iter()
            .map(|offer| offer.nickname_hash.clone())
            .collect();
        for caller in &pending_callers {
            core.send_signal(PacketType::CallDeclined, &me, caller, false);
        }
        if let Some(call) = &teardown.outgoing {
            if call.call_key.is_some() {
                core.send_signal(PacketType::StopCalling, &me, &call.nickname_hash, false);
            }
        }
        if let Some(call) = &teardown.active {
            core.send_signal(PacketType::EndCall, &me, &call.nickname_hash, false);
            core.audio.stop_stream();
        }

        let body = Logout {
            uuid: crypto::generate_uuid(),
            sender: me,
            pending_callers,
        };
        tracing::info!(nickname = ?teardown.nickname, "logging out");
        core.send_confirmed(PacketType::Logout, body.uuid.clone(), &body, |c| {
            c.emit(ClientEvent::LogoutCompleted);
        });
        Ok(())
    }

    // ── Calls ────────────────────────────────────────────────────────────────

    /// Call `nickname`. If they already offered us a call, accept it instead.
    pub fn start_calling(&self, nickname: &str) -> Result<(), CallError> {
        if nickname.trim().is_empty() {
            return Err(CallError::InvalidNickname);
        }

        let core = &self.core;
        let dial = core.state.with(|s| -> Result<Dial, CallError> {
            if s.state() == ClientState::Busy {
                return Err(CallError::ActiveCallExists);
            }
            let me = s.nickname().map(hash).ok_or(CallError::NotAuthorized)?;
            if s.has_incoming(nickname) {
                return Ok(Dial::Accept(me, s.accept_incoming(nickname)?));
            }
            s.begin_calling(nickname, hash(nickname))?;
            if let Some(call) = s.outgoing_mut() {
                core.request_friend_info(call, me);
            }
            Ok(Dial::Calling)
        })?;

        match dial {
            Dial::Accept(me, accepted) => self.complete_accept(me, accepted),
            Dial::Calling => tracing::info!(callee = %nickname, "calling"),
        }
        Ok(())
    }

    pub fn stop_calling(&self) -> Result<(), CallError> {
        let core = &self.core;
        let (me, call) = core.state.with(|s| {
            let me = s.nickname().map(hash).ok_or(CallError::NotAuthorized)?;
            let call = s.end_calling().ok_or(CallError::NoOutgoingCall)?;
            Ok::<_, CallError>((me, call))
        })?;

        if let Some(uuid) = &call.pending_request {
            core.tasks.finish_task(uuid);
        }
        if call.call_key.is_some() {
            core.send_signal(PacketType::StopCalling, &me, &call.nickname_hash, true);
        }
        tracing::info!(callee = %call.nickname, "calling stopped");
        Ok(())
    }

    /// Accept the offer from `nickname`, declining every other offer and
    /// leaving whatever call we were in.
    pub fn accept_call(&self, nickname: &str) -> Result<(), CallError> {
        let (me, accepted) = self.core.state.with(|s| {
            let me = s.nickname().map(hash).ok_or(CallError::NotAuthorized)?;
            Ok::<_, CallError>((me, s.accept_incoming(nickname)?))
        })?;
        self.complete_accept(me, accepted);
        Ok(())
    }

    /// Signal everything an accept displaced, then send CALL_ACCEPTED.
    fn complete_accept(&self, me: String, accepted: Accepted) {
        let core = &self.core;
        for offer in &accepted.declined {
            core.send_signal(PacketType::CallDeclined, &me, &offer.nickname_hash, true);
        }
        match &accepted.replaced {
            Replaced::Nothing => {}
            Replaced::Outgoing(call) => {
                if let Some(uuid) = &call.pending_request {
                    core.tasks.finish_task(uuid);
                }
                if call.call_key.is_some() {
                    core.send_signal(PacketType::StopCalling, &me, &call.nickname_hash, true);
                }
            }
            Replaced::Active(call) => {
                core.send_signal(PacketType::EndCall, &me, &call.nickname_hash, true);
                core.audio.stop_stream();
            }
        }

        let signal = Signal::new(crypto::generate_uuid(), me, accepted.nickname_hash.clone());
        let partner = accepted.nickname_hash;
        tracing::info!(caller = %accepted.nickname, "accepting call");
        core.send_confirmed(PacketType::CallAccepted, signal.uuid.clone(), &signal, move |c| {
            c.fail_accept(&partner, RequestError::NetworkError);
        });
    }

    pub fn decline_call(&self, nickname: &str) -> Result<(), CallError> {
        let core = &self.core;
        let (me, offer) = core.state.with(|s| {
            let me = s.nickname().map(hash).ok_or(CallError::NotAuthorized)?;
            let offer = s
                .remove_incoming(nickname)
                .ok_or_else(|| CallError::NoIncomingCall(nickname.to_string()))?;
            Ok::<_, CallError>((me, offer))
        })?;
        core.send_signal(PacketType::CallDeclined, &me, &offer.nickname_hash, true);
        tracing::info!(caller = %offer.nickname, "call declined");
        Ok(())
    }

    pub fn end_call(&self) -> Result<(), CallError> {
        let core = &self.core;
        let (me, call) = core.state.with(|s| {
            let me = s.nickname().map(hash).ok_or(CallError::NotAuthorized)?;
            let call = s.end_active().ok_or(CallError::NoActiveCall)?;
            Ok::<_, CallError>((me, call))
        })?;
        core.send_signal(PacketType::EndCall, &me, &call.nickname_hash, true);
        core.audio.stop_stream();
        tracing::info!(partner = %call.nickname, "call ended");
        Ok(())
    }

    // ── Screen / camera ──────────────────────────────────────────────────────

    pub fn start_screen_sharing(&self) -> Result<(), CallError> {
        self.start_sharing(Stream::Screen)
    }

    pub fn stop_screen_sharing(&self) -> Result<(), CallError> {
        self.stop_sharing(Stream::Screen)
    }

    pub fn send_screen(&self, frame: &[u8]) -> Result<(), CallError> {
        self.send_frame(Stream::Screen, frame)
    }

    pub fn start_camera_sharing(&self) -> Result<(), CallError> {
        self.start_sharing(Stream::Camera)
    }

    pub fn stop_camera_sharing(&self) -> Result<(), CallError> {
        self.stop_sharing(Stream::Camera)
    }

    pub fn send_camera(&self, frame: &[u8]) -> Result<(), CallError> {
        self.send_frame(Stream::Camera, frame)
    }

    fn start_sharing(&self, stream: Stream) -> Result<(), CallError> {
        let core = &self.core;
        let (me, partner) = core.state.with(|s| -> Result<(String, String), CallError> {
            let me = s.nickname().map(hash).ok_or(CallError::NotAuthorized)?;
            let call = s.active_mut().ok_or(CallError::NoActiveCall)?;
            match stream {
                Stream::Screen => {
                    if call.screen != Sharing::Inactive {
                        return Err(CallError::ScreenSharingAlreadyActive);
                    }
                    if call.viewing_remote_screen {
                        return Err(CallError::ViewingRemoteScreen);
                    }
                    call.screen = Sharing::Requested;
                }
                Stream::Camera => {
                    if call.camera != Sharing::Inactive {
                        return Err(CallError::CameraSharingAlreadyActive);
                    }
                    call.camera = Sharing::Requested;
                }
            }
            Ok((me, call.nickname_hash.clone()))
        })?;

        let signal = Signal::new(crypto::generate_uuid(), me, partner.clone()).with_confirmation(true);
        core.send_confirmed(stream.start_packet(), signal.uuid.clone(), &signal, move |c| {
            c.fail_sharing(stream, &partner, RequestError::NetworkError);
        });
        Ok(())
    }

    fn stop_sharing(&self, stream: Stream) -> Result<(), CallError> {
        let core = &self.core;
        let (me, partner) = core.state.with(|s| -> Result<(String, String), CallError> {
            let me = s.nickname().map(hash).ok_or(CallError::NotAuthorized)?;
            let call = s.active_mut().ok_or(CallError::NoActiveCall)?;
            let (sharing, not_active) = match stream {
                Stream::Screen => (&mut call.screen, CallError::ScreenSharingNotActive),
                Stream::Camera => (&mut call.camera, CallError::CameraSharingNotActive),
            };
            if *sharing == Sharing::Inactive {
                return Err(not_active);
            }
            *sharing = Sharing::Inactive;
            Ok((me, call.nickname_hash.clone()))
        })?;
        core.send_signal(stream.stop_packet(), &me, &partner, true);
        Ok(())
    }

    fn send_frame(&self, stream: Stream, frame: &[u8]) -> Result<(), CallError> {
        let key = self.core.state.with(|s| -> Result<_, CallError> {
            if !s.is_authorized() {
                return Err(CallError::NotAuthorized);
            }
            let call = s.active().ok_or(CallError::NoActiveCall)?;
            let (sharing, not_active) = match stream {
                Stream::Screen => (call.screen, CallError::ScreenSharingNotActive),
                Stream::Camera => (call.camera, CallError::CameraSharingNotActive),
            };
            if sharing != Sharing::Active {
                return Err(not_active);
            }
            Ok(call.call_key.clone())
        })?;
        let sealed = aes_stream_encrypt(&key, frame)?;
        self.core.send_raw(stream.media_packet(), sealed);
        Ok(())
    }

    // ── Audio ────────────────────────────────────────────────────────────────

    /// Captured microphone frame. Sent only during a call and while unmuted.
    pub fn on_input_voice(&self, frame: &[u8]) {
        send_voice(&self.core, frame);
    }

    /// A handle the audio engine's capture thread can hold.
    pub fn voice_input(&self) -> VoiceInput {
        VoiceInput {
            core: Arc::downgrade(&self.core),
        }
    }

    pub fn mute(&self, muted: bool) {
        self.core.audio.set_muted(muted);
    }

    pub fn is_muted(&self) -> bool {
        self.core.audio.is_muted()
    }

    pub fn set_volume(&self, volume: u8) {
        self.core.audio.set_volume(volume);
    }

    pub fn volume(&self) -> u8 {
        self.core.audio.volume()
    }

    // ── Getters ──────────────────────────────────────────────────────────────

    pub fn state(&self) -> ClientState {
        self.core.state.state()
    }

    pub fn nickname(&self) -> Option<String> {
        self.core.state.lock().nickname().map(str::to_string)
    }

    /// Nicknames with a pending offer to us, sorted.
    pub fn callers(&self) -> Vec<String> {
        self.core.state.lock().callers()
    }

    pub fn is_authorized(&self) -> bool {
        self.state() != ClientState::Unauthorized
    }

    pub fn is_calling(&self) -> bool {
        self.state() == ClientState::Calling
    }

    pub fn is_busy(&self) -> bool {
        self.state() == ClientState::Busy
    }

    pub fn calling_nickname(&self) -> Option<String> {
        self.core.state.lock().outgoing().map(|c| c.nickname.clone())
    }

    pub fn call_partner(&self) -> Option<String> {
        self.core.state.lock().active().map(|c| c.nickname.clone())
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.active_flag(|c| c.screen == Sharing::Active)
    }

    pub fn is_camera_sharing(&self) -> bool {
        self.active_flag(|c| c.camera == Sharing::Active)
    }

    pub fn is_viewing_remote_screen(&self) -> bool {
        self.active_flag(|c| c.viewing_remote_screen)
    }

    pub fn is_viewing_remote_camera(&self) -> bool {
        self.active_flag(|c| c.viewing_remote_camera)
    }

    fn active_flag(&self, f: impl FnOnce(&crate::state::ActiveCall) -> bool) -> bool {
        self.core.state.lock().active().is_some_and(f)
    }
}

impl Drop for CallsClient {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// Cloneable sink for captured voice frames.
#[derive(Clone)]
pub struct VoiceInput {
    core: Weak<ClientCore>,
}

impl VoiceInput {
    pub fn push(&self, frame: &[u8]) {
        if let Some(core) = self.core.upgrade() {
            send_voice(&core, frame);
        }
    }
}

fn send_voice(core: &ClientCore, frame: &[u8]) {
    if core.audio.is_muted() {
        return;
    }
    let Some(key) = core.state.with(|s| s.active().map(|c| c.call_key.clone())) else {
        return;
    };
    match aes_stream_encrypt(&key, frame) {
        Ok(sealed) => core.send_raw(PacketType::Voice, sealed),
        Err(e) => tracing::debug!(error = %e, "voice frame not sent"),
    }
}
