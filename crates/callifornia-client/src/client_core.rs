//! Shared client internals.
//!
//! `ClientCore` is what the facade, the packet handlers and the timers all
//! act on. Timers and retry callbacks hold a `Weak` to it so they never keep
//! a stopped client alive.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use serde::Serialize;
use tokio::runtime::Handle;

use callifornia_core::crypto::{self, hash};
use callifornia_core::packet::{
    Authorize, CallOffer, Correlated, FriendInfoRequest, Signal, PROTOCOL_VERSION,
};
use callifornia_core::{CallsConfig, KeyPair, PacketType};

use crate::audio::AudioEngine;
use crate::event::{ClientEvent, EventQueue, RequestError};
use crate::keys::KeyManager;
use crate::liveness::LivenessMonitor;
use crate::state::{CallError, CallStateManager, OutgoingCall, Sharing};
use crate::task::TaskManager;
use crate::timer::ExpiryTimer;
use crate::transport::{OutgoingPacket, PacketSender};

/// Which local stream a sharing packet refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Screen,
    Camera,
}

impl Stream {
    pub fn start_packet(self) -> PacketType {
        match self {
            Stream::Screen => PacketType::StartScreenSharing,
            Stream::Camera => PacketType::StartCameraSharing,
        }
    }

    pub fn stop_packet(self) -> PacketType {
        match self {
            Stream::Screen => PacketType::StopScreenSharing,
            Stream::Camera => PacketType::StopCameraSharing,
        }
    }

    pub fn media_packet(self) -> PacketType {
        match self {
            Stream::Screen => PacketType::Screen,
            Stream::Camera => PacketType::Camera,
        }
    }

    pub fn result_event(self, result: Result<(), RequestError>) -> ClientEvent {
        match self {
            Stream::Screen => ClientEvent::StartScreenSharingResult(result),
            Stream::Camera => ClientEvent::StartCameraSharingResult(result),
        }
    }
}

pub struct ClientCore {
    me: Weak<ClientCore>,
    pub(crate) config: CallsConfig,
    pub(crate) runtime: Handle,
    pub(crate) sender: PacketSender,
    pub(crate) tasks: TaskManager,
    pub(crate) state: CallStateManager,
    pub(crate) keys: KeyManager,
    pub(crate) events: EventQueue,
    pub(crate) audio: Arc<dyn AudioEngine>,
    pub(crate) liveness: Arc<LivenessMonitor>,
}

impl ClientCore {
    pub fn new(
        config: CallsConfig,
        runtime: Handle,
        sender: PacketSender,
        events: EventQueue,
        audio: Arc<dyn AudioEngine>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| ClientCore {
            me: me.clone(),
            tasks: TaskManager::new(config.timing.task_retry_interval(), runtime.clone()),
            state: CallStateManager::new(),
            keys: KeyManager::new(config.crypto.rsa_key_bits, runtime.clone()),
            liveness: Arc::new(LivenessMonitor::new(config.timing.max_ping_failures)),
            config,
            runtime,
            sender,
            events,
            audio,
        })
    }

    // ── Sending ──────────────────────────────────────────────────────────────

    pub fn send_raw(&self, packet_type: PacketType, payload: impl Into<Bytes>) {
        self.sender.send(OutgoingPacket::new(packet_type, payload));
    }

    /// Send a JSON body once.
    pub fn send<T: Serialize>(&self, packet_type: PacketType, body: &T) {
        match serde_json::to_vec(body) {
            Ok(json) => self.send_raw(packet_type, json),
            Err(e) => tracing::error!(error = %e, ?packet_type, "body serialization failed"),
        }
    }

    /// Send a JSON body as a task: retried until its UUID is confirmed,
    /// `on_exhausted` runs if it never is.
    pub fn send_confirmed<T, E>(&self, packet_type: PacketType, uuid: String, body: &T, on_exhausted: E)
    where
        T: Serialize,
        E: FnOnce(&ClientCore) + Send + Sync + 'static,
    {
        let payload = match serde_json::to_vec(body) {
            Ok(json) => Bytes::from(json),
            Err(e) => {
                tracing::error!(error = %e, ?packet_type, "body serialization failed");
                return;
            }
        };

        let sender = self.sender.clone();
        let me = self.me.clone();
        self.tasks.create_task(
            uuid,
            self.config.timing.task_max_attempts,
            move || sender.send(OutgoingPacket::new(packet_type, payload.clone())),
            move || {
                if let Some(core) = me.upgrade() {
                    tracing::debug!(?packet_type, "request unconfirmed");
                    on_exhausted(&core);
                }
            },
        );
    }

    /// Peer signal. A confirmed signal is retried until echoed.
    pub fn send_signal(&self, packet_type: PacketType, sender_hash: &str, receiver_hash: &str, confirmed: bool) {
        let signal = Signal::new(crypto::generate_uuid(), sender_hash.to_string(), receiver_hash.to_string())
            .with_confirmation(confirmed);
        if confirmed {
            let uuid = signal.uuid.clone();
            self.send_confirmed(packet_type, uuid, &signal, |_| {});
        } else {
            self.send(packet_type, &signal);
        }
    }

    /// Finish the task a confirmation refers to. `None` if nothing was
    /// waiting for it, which makes duplicate confirmations no-ops.
    pub fn resolve(&self, payload: &[u8]) -> anyhow::Result<Option<String>> {
        let Correlated { uuid } = serde_json::from_slice(payload)?;
        if self.tasks.finish_task(&uuid) {
            Ok(Some(uuid))
        } else {
            tracing::trace!(uuid, "confirmation for unknown request");
            Ok(None)
        }
    }

    pub fn emit(&self, event: ClientEvent) {
        self.events.push(event);
    }

    /// Single-shot timer calling back into the core.
    pub fn timer<F>(&self, f: F) -> ExpiryTimer
    where
        F: FnOnce(&ClientCore) + Send + 'static,
    {
        let me = self.me.clone();
        ExpiryTimer::start(&self.runtime, self.config.timing.call_expiry(), move || {
            if let Some(core) = me.upgrade() {
                f(&core);
            }
        })
    }

    // ── Authorization ────────────────────────────────────────────────────────

    /// Wait for keys, then send AUTHORIZE as a task.
    pub async fn send_authorization(self: Arc<Self>, nickname: String) {
        let keys = match self.keys.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!(error = %e, "no keys to authorize with");
                if self.state.with(|s| s.abort_authorization()) {
                    self.emit(ClientEvent::AuthorizationResult(Err(RequestError::EncryptionError)));
                }
                return;
            }
        };

        if !self.state.with(|s| s.is_authorizing()) {
            return;
        }

        let public_key = match keys.public_key_base64() {
            Ok(k) => k,
            Err(e) => {
                tracing::error!(error = %e, "public key encoding failed");
                if self.state.with(|s| s.abort_authorization()) {
                    self.emit(ClientEvent::AuthorizationResult(Err(RequestError::EncryptionError)));
                }
                return;
            }
        };

        let body = Authorize {
            uuid: crypto::generate_uuid(),
            sender: hash(&nickname),
            public_key,
            version: PROTOCOL_VERSION.to_string(),
        };
        tracing::info!(%nickname, "authorizing");
        self.send_confirmed(PacketType::Authorize, body.uuid.clone(), &body, |core| {
            if core.state.with(|s| s.abort_authorization()) {
                core.emit(ClientEvent::AuthorizationResult(Err(RequestError::NetworkError)));
            }
        });
    }

    // ── Outgoing call ────────────────────────────────────────────────────────

    /// Ask the relay for the callee's public key.
    pub fn request_friend_info(&self, call: &mut OutgoingCall, sender_hash: String) {
        let body = FriendInfoRequest {
            uuid: crypto::generate_uuid(),
            target: call.nickname_hash.clone(),
            sender: sender_hash,
        };
        call.pending_request = Some(body.uuid.clone());
        let uuid = body.uuid.clone();
        self.send_confirmed(PacketType::GetFriendInfo, body.uuid.clone(), &body, move |core| {
            core.fail_outgoing(&uuid, RequestError::NetworkError);
        });
    }

    /// Build and send START_CALLING to a callee whose key we now know.
    ///
    /// The nickname is encrypted under a one-off packet key; that key and a
    /// fresh call key are both wrapped to the callee.
    pub fn send_call_offer(&self, call: &mut OutgoingCall, my_nickname: &str, keys: &KeyPair) -> Result<(), CallError> {
        let peer = call.peer_public_key.as_ref().ok_or(CallError::NoOutgoingCall)?;

        let call_key = callifornia_core::AesKey::generate();
        let packet_key = callifornia_core::AesKey::generate();

        let offer = CallOffer {
            uuid: crypto::generate_uuid(),
            packet_key: crypto::rsa_wrap_key(peer, &packet_key)?,
            encrypted_nickname: crypto::aes_string_encrypt(&packet_key, my_nickname)?,
            sender: hash(my_nickname),
            receiver: call.nickname_hash.clone(),
            call_key: crypto::rsa_wrap_key(peer, &call_key)?,
            public_key: keys.public_key_base64()?,
        };

        call.call_key = Some(call_key);
        call.pending_request = Some(offer.uuid.clone());

        let uuid = offer.uuid.clone();
        self.send_confirmed(PacketType::StartCalling, offer.uuid.clone(), &offer, move |core| {
            core.fail_outgoing(&uuid, RequestError::NetworkError);
        });
        Ok(())
    }

    /// Drop the outgoing call if `request` is still the one in flight for it.
    pub fn fail_outgoing(&self, request: &str, error: RequestError) {
        let failed = self.state.with(|s| {
            let current = s
                .outgoing()
                .is_some_and(|c| c.pending_request.as_deref() == Some(request));
            current.then(|| s.end_calling()).flatten()
        });
        if let Some(call) = failed {
            self.tasks.finish_task(request);
            tracing::info!(callee = %call.nickname, error = %error, "call could not be started");
            self.emit(ClientEvent::StartCallingResult(Err(error)));
        }
    }

    /// The callee did not answer in time.
    pub fn expire_outgoing(&self, request: &str) {
        let expired = self.state.with(|s| {
            let current = s
                .outgoing()
                .is_some_and(|c| c.pending_request.as_deref() == Some(request));
            let me = s.nickname().map(hash);
            current.then(|| s.end_calling().zip(me)).flatten()
        });
        if let Some((call, me)) = expired {
            tracing::info!(callee = %call.nickname, "call unanswered, giving up");
            self.send_signal(PacketType::StopCalling, &me, &call.nickname_hash, true);
            self.emit(ClientEvent::MaximumCallingTimeReached);
        }
    }

    // ── Incoming calls ───────────────────────────────────────────────────────

    pub fn expire_incoming(&self, nickname: &str, nickname_hash: &str) {
        let removed = self.state.with(|s| {
            let current = s
                .incoming_mut(nickname)
                .is_some_and(|c| c.nickname_hash == nickname_hash);
            current.then(|| s.remove_incoming(nickname)).flatten()
        });
        if removed.is_some() {
            tracing::info!(caller = %nickname, "incoming call expired");
            self.emit(ClientEvent::IncomingCallExpired {
                nickname: nickname.to_string(),
            });
        }
    }

    /// The call we accepted was refused or never confirmed.
    pub fn fail_accept(&self, partner_hash: &str, error: RequestError) {
        let ended = self.state.with(|s| {
            s.active_with(partner_hash)?;
            s.end_active()
        });
        if let Some(call) = ended {
            self.audio.stop_stream();
            tracing::info!(caller = %call.nickname, error = %error, "accepting call failed");
            self.emit(ClientEvent::AcceptCallResult {
                nickname: call.nickname,
                result: Err(error),
            });
        }
    }

    // ── Sharing ──────────────────────────────────────────────────────────────

    pub fn fail_sharing(&self, stream: Stream, partner_hash: &str, error: RequestError) {
        let failed = self.state.with(|s| {
            let call = s.active_with(partner_hash)?;
            let sharing = match stream {
                Stream::Screen => &mut call.screen,
                Stream::Camera => &mut call.camera,
            };
            if *sharing != Sharing::Requested {
                return None;
            }
            *sharing = Sharing::Inactive;
            Some(())
        });
        if failed.is_some() {
            tracing::info!(?stream, error = %error, "sharing refused");
            self.emit(stream.result_event(Err(error)));
        }
    }

    // ── Connection ───────────────────────────────────────────────────────────

    /// Liveness lost: forget everything and report it.
    pub async fn on_connection_down(&self) {
        self.tasks.cancel_all();
        let teardown = self.state.with(|s| s.reset());
        if teardown.active.is_some() {
            self.audio.stop_stream();
        }
        drop(teardown);
        self.keys.reset().await;
        tracing::warn!("connection down, session reset");
        self.emit(ClientEvent::ConnectionDown);
    }

    pub fn on_connection_restored(&self) {
        tracing::info!("connection restored");
        self.emit(ClientEvent::ConnectionRestored);
    }
}
