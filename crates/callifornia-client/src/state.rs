//! Call state machine.
//!
//! `Session` holds everything that changes as calls come and go: the
//! authorization phase, the outgoing call, the active call and the table of
//! pending incoming offers. Its methods are pure transitions; the facade
//! and the packet processor decide which packets to send around them.
//!
//! Invariants kept here:
//! - at most one of {outgoing call, active call} exists, and only while
//!   authorized;
//! - incoming offers exist only while authorized, one per caller nickname;
//! - every call and offer owns its expiry timer, so removing it disarms it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

use callifornia_core::{AesKey, CryptoError, RsaPublicKey};

use crate::timer::ExpiryTimer;

// ── Public view ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unauthorized,
    Free,
    Calling,
    Busy,
}

/// Local media sharing progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sharing {
    #[default]
    Inactive,
    /// Start sent, waiting for the peer's confirmation.
    Requested,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("not authorized")]
    NotAuthorized,
    #[error("already authorized")]
    AlreadyAuthorized,
    #[error("operation already in progress")]
    OperationInProgress,
    #[error("a call is already in progress")]
    ActiveCallExists,
    #[error("no incoming call from {0}")]
    NoIncomingCall(String),
    #[error("no outgoing call")]
    NoOutgoingCall,
    #[error("no active call")]
    NoActiveCall,
    #[error("screen sharing already active")]
    ScreenSharingAlreadyActive,
    #[error("screen sharing not active")]
    ScreenSharingNotActive,
    #[error("camera sharing already active")]
    CameraSharingAlreadyActive,
    #[error("camera sharing not active")]
    CameraSharingNotActive,
    #[error("remote user is sharing their screen")]
    ViewingRemoteScreen,
    #[error("invalid nickname")]
    InvalidNickname,
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error("client stopped")]
    Closed,
}

impl From<CryptoError> for CallError {
    fn from(e: CryptoError) -> Self {
        CallError::Crypto(e.to_string())
    }
}

// ── Calls ────────────────────────────────────────────────────────────────────

/// A call we placed that has not been answered yet.
#[derive(Debug)]
pub struct OutgoingCall {
    pub nickname: String,
    pub nickname_hash: String,
    /// Known once the relay answered GET_FRIEND_INFO.
    pub peer_public_key: Option<RsaPublicKey>,
    /// Known once START_CALLING was built.
    pub call_key: Option<AesKey>,
    /// UUID of the request currently in flight for this call.
    pub pending_request: Option<String>,
    pub timer: Option<ExpiryTimer>,
}

impl OutgoingCall {
    pub fn new(nickname: String, nickname_hash: String) -> Self {
        Self {
            nickname,
            nickname_hash,
            peer_public_key: None,
            call_key: None,
            pending_request: None,
            timer: None,
        }
    }
}

/// An offer someone made to us.
#[derive(Debug)]
pub struct IncomingCall {
    pub nickname: String,
    pub nickname_hash: String,
    pub public_key: RsaPublicKey,
    pub call_key: AesKey,
    pub timer: Option<ExpiryTimer>,
}

#[derive(Debug)]
pub struct ActiveCall {
    pub nickname: String,
    pub nickname_hash: String,
    pub public_key: RsaPublicKey,
    pub call_key: AesKey,
    pub screen: Sharing,
    pub camera: Sharing,
    pub viewing_remote_screen: bool,
    pub viewing_remote_camera: bool,
}

impl ActiveCall {
    fn new(nickname: String, nickname_hash: String, public_key: RsaPublicKey, call_key: AesKey) -> Self {
        Self {
            nickname,
            nickname_hash,
            public_key,
            call_key,
            screen: Sharing::Inactive,
            camera: Sharing::Inactive,
            viewing_remote_screen: false,
            viewing_remote_camera: false,
        }
    }
}

impl From<IncomingCall> for ActiveCall {
    fn from(offer: IncomingCall) -> Self {
        ActiveCall::new(offer.nickname, offer.nickname_hash, offer.public_key, offer.call_key)
    }
}

// ── Transition results ───────────────────────────────────────────────────────

/// Everything a reset removed, so the caller can notify peers.
#[derive(Debug, Default)]
pub struct Teardown {
    pub nickname: Option<String>,
    pub incoming: Vec<IncomingCall>,
    pub outgoing: Option<OutgoingCall>,
    pub active: Option<ActiveCall>,
}

/// What accepting an offer displaced.
#[derive(Debug)]
pub enum Replaced {
    Nothing,
    Outgoing(OutgoingCall),
    Active(ActiveCall),
}

#[derive(Debug)]
pub struct Accepted {
    pub nickname: String,
    pub nickname_hash: String,
    pub declined: Vec<IncomingCall>,
    pub replaced: Replaced,
}

/// Our outgoing call was answered.
#[derive(Debug)]
pub struct Promoted {
    pub nickname: String,
    pub pending_request: Option<String>,
    pub declined: Vec<IncomingCall>,
}

// ── Session ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
enum Phase {
    #[default]
    Unauthorized,
    Authorizing,
    Free,
    Calling(OutgoingCall),
    Busy(ActiveCall),
}

#[derive(Debug, Default)]
pub struct Session {
    nickname: Option<String>,
    phase: Phase,
    incoming: HashMap<String, IncomingCall>,
}

impl Session {
    pub fn state(&self) -> ClientState {
        match self.phase {
            Phase::Unauthorized | Phase::Authorizing => ClientState::Unauthorized,
            Phase::Free => ClientState::Free,
            Phase::Calling(_) => ClientState::Calling,
            Phase::Busy(_) => ClientState::Busy,
        }
    }

    pub fn nickname(&self) -> Option<&str> {
        match self.phase {
            Phase::Unauthorized | Phase::Authorizing => None,
            _ => self.nickname.as_deref(),
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.state() != ClientState::Unauthorized
    }

    pub fn is_authorizing(&self) -> bool {
        matches!(self.phase, Phase::Authorizing)
    }

    fn require_authorized(&self) -> Result<(), CallError> {
        if self.is_authorized() {
            Ok(())
        } else {
            Err(CallError::NotAuthorized)
        }
    }

    // ── Authorization ────────────────────────────────────────────────────────

    pub fn begin_authorization(&mut self, nickname: &str) -> Result<(), CallError> {
        match self.phase {
            Phase::Unauthorized => {
                self.nickname = Some(nickname.to_string());
                self.phase = Phase::Authorizing;
                Ok(())
            }
            Phase::Authorizing => Err(CallError::OperationInProgress),
            _ => Err(CallError::AlreadyAuthorized),
        }
    }

    /// Returns false if no authorization was in flight.
    pub fn finish_authorization(&mut self) -> bool {
        if matches!(self.phase, Phase::Authorizing) {
            self.phase = Phase::Free;
            true
        } else {
            false
        }
    }

    pub fn abort_authorization(&mut self) -> bool {
        if matches!(self.phase, Phase::Authorizing) {
            self.phase = Phase::Unauthorized;
            self.nickname = None;
            true
        } else {
            false
        }
    }

    /// Back to unauthorized, handing over everything that was live.
    pub fn reset(&mut self) -> Teardown {
        let mut teardown = Teardown {
            nickname: self.nickname.take(),
            incoming: self.incoming.drain().map(|(_, v)| v).collect(),
            ..Teardown::default()
        };
        match std::mem::take(&mut self.phase) {
            Phase::Calling(call) => teardown.outgoing = Some(call),
            Phase::Busy(call) => teardown.active = Some(call),
            _ => {}
        }
        teardown
    }

    // ── Outgoing ─────────────────────────────────────────────────────────────

    pub fn begin_calling(&mut self, nickname: &str, nickname_hash: String) -> Result<(), CallError> {
        match self.phase {
            Phase::Free => {}
            Phase::Unauthorized | Phase::Authorizing => return Err(CallError::NotAuthorized),
            Phase::Calling(_) => return Err(CallError::OperationInProgress),
            Phase::Busy(_) => return Err(CallError::ActiveCallExists),
        }
        if self.nickname.as_deref() == Some(nickname) {
            return Err(CallError::InvalidNickname);
        }
        self.phase = Phase::Calling(OutgoingCall::new(nickname.to_string(), nickname_hash));
        Ok(())
    }

    pub fn outgoing(&self) -> Option<&OutgoingCall> {
        match &self.phase {
            Phase::Calling(call) => Some(call),
            _ => None,
        }
    }

    pub fn outgoing_mut(&mut self) -> Option<&mut OutgoingCall> {
        match &mut self.phase {
            Phase::Calling(call) => Some(call),
            _ => None,
        }
    }

    /// Abandon the outgoing call, if any.
    pub fn end_calling(&mut self) -> Option<OutgoingCall> {
        if !matches!(self.phase, Phase::Calling(_)) {
            return None;
        }
        match std::mem::replace(&mut self.phase, Phase::Free) {
            Phase::Calling(call) => Some(call),
            _ => None,
        }
    }

    /// The callee accepted: move to busy and decline every pending offer.
    ///
    /// Only an accept from the callee of a fully built offer counts.
    pub fn promote_outgoing(&mut self, sender_hash: &str) -> Option<Promoted> {
        let ready = self.outgoing().is_some_and(|call| {
            call.nickname_hash == sender_hash
                && call.peer_public_key.is_some()
                && call.call_key.is_some()
        });
        if !ready {
            return None;
        }

        let call = self.end_calling()?;
        let (Some(public_key), Some(call_key)) = (call.peer_public_key, call.call_key) else {
            return None;
        };
        let nickname = call.nickname.clone();
        self.phase = Phase::Busy(ActiveCall::new(call.nickname, call.nickname_hash, public_key, call_key));

        Some(Promoted {
            nickname,
            pending_request: call.pending_request,
            declined: self.take_all_incoming(),
        })
    }

    // ── Incoming ─────────────────────────────────────────────────────────────

    /// Record an offer. False if one from that nickname is already pending.
    pub fn add_incoming(&mut self, offer: IncomingCall) -> Result<bool, CallError> {
        self.require_authorized()?;
        if self.incoming.contains_key(&offer.nickname) {
            return Ok(false);
        }
        self.incoming.insert(offer.nickname.clone(), offer);
        Ok(true)
    }

    pub fn incoming_mut(&mut self, nickname: &str) -> Option<&mut IncomingCall> {
        self.incoming.get_mut(nickname)
    }

    pub fn remove_incoming(&mut self, nickname: &str) -> Option<IncomingCall> {
        self.incoming.remove(nickname)
    }

    pub fn remove_incoming_by_hash(&mut self, nickname_hash: &str) -> Option<IncomingCall> {
        let nickname = self
            .incoming
            .values()
            .find(|c| c.nickname_hash == nickname_hash)
            .map(|c| c.nickname.clone())?;
        self.incoming.remove(&nickname)
    }

    pub fn take_all_incoming(&mut self) -> Vec<IncomingCall> {
        self.incoming.drain().map(|(_, v)| v).collect()
    }

    pub fn has_incoming(&self, nickname: &str) -> bool {
        self.incoming.contains_key(nickname)
    }

    /// Nicknames with a pending offer, sorted.
    pub fn callers(&self) -> Vec<String> {
        let mut callers: Vec<String> = self.incoming.keys().cloned().collect();
        callers.sort();
        callers
    }

    /// Take the offer from `nickname` as the active call.
    ///
    /// Every other offer is handed back for declining, as is whatever
    /// outgoing or active call it displaced.
    pub fn accept_incoming(&mut self, nickname: &str) -> Result<Accepted, CallError> {
        self.require_authorized()?;
        let offer = self
            .incoming
            .remove(nickname)
            .ok_or_else(|| CallError::NoIncomingCall(nickname.to_string()))?;

        let declined = self.take_all_incoming();
        let nickname_hash = offer.nickname_hash.clone();
        let nickname = offer.nickname.clone();

        let replaced = match std::mem::replace(&mut self.phase, Phase::Busy(offer.into())) {
            Phase::Calling(call) => Replaced::Outgoing(call),
            Phase::Busy(call) => Replaced::Active(call),
            _ => Replaced::Nothing,
        };

        Ok(Accepted {
            nickname,
            nickname_hash,
            declined,
            replaced,
        })
    }

    // ── Active ───────────────────────────────────────────────────────────────

    pub fn active(&self) -> Option<&ActiveCall> {
        match &self.phase {
            Phase::Busy(call) => Some(call),
            _ => None,
        }
    }

    pub fn active_mut(&mut self) -> Option<&mut ActiveCall> {
        match &mut self.phase {
            Phase::Busy(call) => Some(call),
            _ => None,
        }
    }

    /// The active call, only if it is with `nickname_hash`.
    pub fn active_with(&mut self, nickname_hash: &str) -> Option<&mut ActiveCall> {
        self.active_mut().filter(|c| c.nickname_hash == nickname_hash)
    }

    pub fn end_active(&mut self) -> Option<ActiveCall> {
        if !matches!(self.phase, Phase::Busy(_)) {
            return None;
        }
        match std::mem::replace(&mut self.phase, Phase::Free) {
            Phase::Busy(call) => Some(call),
            _ => None,
        }
    }
}

/// Shared, lock-protected session.
#[derive(Debug, Default)]
pub struct CallStateManager {
    session: Mutex<Session>,
}

impl CallStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the session. A panicked holder cannot leave it half-updated in a
    /// way later transitions can't handle, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn state(&self) -> ClientState {
        self.lock().state()
    }
}
