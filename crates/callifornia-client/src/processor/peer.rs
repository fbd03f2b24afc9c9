//! Packets another client sent us through the relay, and the echoes that
//! confirm the ones we sent.

use anyhow::Result;

use callifornia_core::crypto::{self, hash};
use callifornia_core::packet::{CallOffer, Signal};
use callifornia_core::{AesKey, CryptoError, KeyPair, PacketType, RsaPublicKey};

use super::PacketProcessor;
use crate::client_core::{ClientCore, Stream};
use crate::event::{ClientEvent, RequestError};
use crate::state::{IncomingCall, Promoted, Sharing};

pub(super) fn register(p: &mut PacketProcessor) {
    p.register(PacketType::StartCalling, on_call_offer);
    p.register(PacketType::StartCallingOk, on_start_calling_ok);
    p.register(PacketType::StopCalling, on_stop_calling);
    p.register(PacketType::StopCallingOk, on_confirmation);
    p.register(PacketType::CallAccepted, on_call_accepted);
    p.register(PacketType::CallAcceptedOk, on_call_accepted_ok);
    p.register(PacketType::CallAcceptedFail, on_call_accepted_fail);
    p.register(PacketType::CallDeclined, on_call_declined);
    p.register(PacketType::CallDeclinedOk, on_confirmation);
    p.register(PacketType::EndCall, on_end_call);
    p.register(PacketType::EndCallOk, on_confirmation);

    p.register(PacketType::StartScreenSharing, |c, p| on_start_sharing(c, p, Stream::Screen));
    p.register(PacketType::StartScreenSharingOk, |c, p| on_start_sharing_ok(c, p, Stream::Screen));
    p.register(PacketType::StartScreenSharingFail, |c, p| on_start_sharing_fail(c, p, Stream::Screen));
    p.register(PacketType::StopScreenSharing, |c, p| on_stop_sharing(c, p, Stream::Screen));
    p.register(PacketType::StopScreenSharingOk, on_confirmation);

    p.register(PacketType::StartCameraSharing, |c, p| on_start_sharing(c, p, Stream::Camera));
    p.register(PacketType::StartCameraSharingOk, |c, p| on_start_sharing_ok(c, p, Stream::Camera));
    p.register(PacketType::StartCameraSharingFail, |c, p| on_start_sharing_fail(c, p, Stream::Camera));
    p.register(PacketType::StopCameraSharing, |c, p| on_stop_sharing(c, p, Stream::Camera));
    p.register(PacketType::StopCameraSharingOk, on_confirmation);
}

fn echo(core: &ClientCore, packet_type: PacketType, signal: &Signal) {
    core.send(packet_type, &signal.echo());
}

fn echo_if_asked(core: &ClientCore, packet_type: PacketType, signal: &Signal) {
    if signal.needs_confirmation() {
        echo(core, packet_type, signal);
    }
}

fn on_confirmation(core: &ClientCore, payload: &[u8]) -> Result<()> {
    core.resolve(payload)?;
    Ok(())
}

// ── Offers ───────────────────────────────────────────────────────────────────

/// Unwrap the packet key, decrypt the caller's nickname, unwrap the call key.
fn open_offer(offer: &CallOffer, keys: &KeyPair) -> Result<(String, AesKey, RsaPublicKey), CryptoError> {
    let packet_key = crypto::rsa_unwrap_key(keys.private_key(), &offer.packet_key)?;
    let nickname = crypto::aes_string_decrypt(&packet_key, &offer.encrypted_nickname)?;
    let call_key = crypto::rsa_unwrap_key(keys.private_key(), &offer.call_key)?;
    let public_key = crypto::deserialize_public_key(&offer.public_key)?;
    Ok((nickname, call_key, public_key))
}

fn on_call_offer(core: &ClientCore, payload: &[u8]) -> Result<()> {
    let offer: CallOffer = serde_json::from_slice(payload)?;
    let Some(keys) = core.keys.try_keys() else {
        tracing::debug!("call offer before keys exist, ignored");
        return Ok(());
    };

    let (nickname, call_key, public_key) = match open_offer(&offer, &keys) {
        Ok(opened) => opened,
        Err(e) => {
            tracing::warn!(error = %e, "call offer could not be decrypted");
            return Ok(());
        }
    };
    if hash(&nickname) != offer.sender {
        tracing::warn!(caller = %nickname, "call offer sender hash mismatch");
        return Ok(());
    }

    core.send(
        PacketType::StartCallingOk,
        &Signal::new(offer.uuid.clone(), offer.receiver.clone(), offer.sender.clone()),
    );

    let (n, h) = (nickname.clone(), offer.sender.clone());
    let incoming = IncomingCall {
        nickname: nickname.clone(),
        nickname_hash: offer.sender.clone(),
        public_key,
        call_key,
        timer: Some(core.timer(move |c| c.expire_incoming(&n, &h))),
    };

    match core.state.with(|s| s.add_incoming(incoming)) {
        Ok(true) => {
            tracing::info!(caller = %nickname, "incoming call");
            core.emit(ClientEvent::IncomingCall { nickname });
        }
        Ok(false) => tracing::trace!(caller = %nickname, "repeated call offer"),
        Err(e) => tracing::debug!(error = %e, "call offer dropped"),
    }
    Ok(())
}

fn on_start_calling_ok(core: &ClientCore, payload: &[u8]) -> Result<()> {
    let Some(uuid) = core.resolve(payload)? else {
        return Ok(());
    };

    let armed = core.state.with(|s| {
        let call = s.outgoing_mut()?;
        if call.pending_request.as_deref() != Some(uuid.as_str()) {
            return None;
        }
        let request = uuid.clone();
        call.timer = Some(core.timer(move |c| c.expire_outgoing(&request)));
        Some(call.nickname.clone())
    });

    if let Some(callee) = armed {
        tracing::info!(%callee, "ringing");
        core.emit(ClientEvent::StartCallingResult(Ok(())));
    }
    Ok(())
}

fn on_stop_calling(core: &ClientCore, payload: &[u8]) -> Result<()> {
    let signal: Signal = serde_json::from_slice(payload)?;
    echo_if_asked(core, PacketType::StopCallingOk, &signal);

    if let Some(offer) = core.state.with(|s| s.remove_incoming_by_hash(&signal.sender)) {
        tracing::info!(caller = %offer.nickname, "caller hung up");
        core.emit(ClientEvent::IncomingCallExpired {
            nickname: offer.nickname.clone(),
        });
    }
    Ok(())
}

// ── Accept / decline / end ───────────────────────────────────────────────────

enum AcceptOutcome {
    Promoted(Promoted),
    AlreadyActive,
    Rejected,
}

/// The callee picked up.
fn on_call_accepted(core: &ClientCore, payload: &[u8]) -> Result<()> {
    let signal: Signal = serde_json::from_slice(payload)?;

    let outcome = core.state.with(|s| {
        if s.active_with(&signal.sender).is_some() {
            return AcceptOutcome::AlreadyActive;
        }
        match s.promote_outgoing(&signal.sender) {
            Some(promoted) => AcceptOutcome::Promoted(promoted),
            None => AcceptOutcome::Rejected,
        }
    });

    match outcome {
        AcceptOutcome::Promoted(promoted) => {
            if let Some(uuid) = &promoted.pending_request {
                core.tasks.finish_task(uuid);
            }
            for offer in &promoted.declined {
                core.send_signal(PacketType::CallDeclined, &signal.receiver, &offer.nickname_hash, true);
            }
            echo(core, PacketType::CallAcceptedOk, &signal);
            core.audio.start_stream();
            tracing::info!(partner = %promoted.nickname, "call established");
            core.emit(ClientEvent::CallingAccepted);
        }
        AcceptOutcome::AlreadyActive => echo(core, PacketType::CallAcceptedOk, &signal),
        AcceptOutcome::Rejected => {
            tracing::debug!("accept for a call we are not placing");
            echo(core, PacketType::CallAcceptedFail, &signal);
        }
    }
    Ok(())
}

fn on_call_accepted_ok(core: &ClientCore, payload: &[u8]) -> Result<()> {
    let signal: Signal = serde_json::from_slice(payload)?;
    if !core.tasks.finish_task(&signal.uuid) {
        return Ok(());
    }

    let partner = core
        .state
        .with(|s| s.active_with(&signal.sender).map(|c| c.nickname.clone()));
    if let Some(nickname) = partner {
        core.audio.start_stream();
        tracing::info!(partner = %nickname, "call established");
        core.emit(ClientEvent::AcceptCallResult {
            nickname,
            result: Ok(()),
        });
    }
    Ok(())
}

fn on_call_accepted_fail(core: &ClientCore, payload: &[u8]) -> Result<()> {
    let signal: Signal = serde_json::from_slice(payload)?;
    if core.tasks.finish_task(&signal.uuid) {
        core.fail_accept(&signal.sender, RequestError::Rejected);
    }
    Ok(())
}

fn on_call_declined(core: &ClientCore, payload: &[u8]) -> Result<()> {
    let signal: Signal = serde_json::from_slice(payload)?;
    echo_if_asked(core, PacketType::CallDeclinedOk, &signal);

    let declined = core.state.with(|s| {
        let ours = s.outgoing().is_some_and(|c| c.nickname_hash == signal.sender);
        ours.then(|| s.end_calling()).flatten()
    });
    if let Some(call) = declined {
        if let Some(uuid) = &call.pending_request {
            core.tasks.finish_task(uuid);
        }
        tracing::info!(callee = %call.nickname, "call declined");
        core.emit(ClientEvent::CallingDeclined);
    }
    Ok(())
}

fn on_end_call(core: &ClientCore, payload: &[u8]) -> Result<()> {
    let signal: Signal = serde_json::from_slice(payload)?;
    echo_if_asked(core, PacketType::EndCallOk, &signal);

    let ended = core.state.with(|s| {
        s.active_with(&signal.sender)?;
        s.end_active()
    });
    if let Some(call) = ended {
        core.audio.stop_stream();
        tracing::info!(partner = %call.nickname, "remote user ended call");
        core.emit(ClientEvent::RemoteUserEndedCall);
    }
    Ok(())
}

// ── Screen / camera ──────────────────────────────────────────────────────────

fn start_ok(stream: Stream) -> PacketType {
    match stream {
        Stream::Screen => PacketType::StartScreenSharingOk,
        Stream::Camera => PacketType::StartCameraSharingOk,
    }
}

fn start_fail(stream: Stream) -> PacketType {
    match stream {
        Stream::Screen => PacketType::StartScreenSharingFail,
        Stream::Camera => PacketType::StartCameraSharingFail,
    }
}

fn stop_ok(stream: Stream) -> PacketType {
    match stream {
        Stream::Screen => PacketType::StopScreenSharingOk,
        Stream::Camera => PacketType::StopCameraSharingOk,
    }
}

/// The peer wants to show us a stream.
///
/// Refused outside a call with that peer, and for the screen while we are
/// sharing ours: only one side shows a screen at a time.
fn on_start_sharing(core: &ClientCore, payload: &[u8], stream: Stream) -> Result<()> {
    let signal: Signal = serde_json::from_slice(payload)?;

    let accepted = core.state.with(|s| {
        let call = s.active_with(&signal.sender)?;
        let viewing = match stream {
            Stream::Screen if call.screen != Sharing::Inactive => return None,
            Stream::Screen => &mut call.viewing_remote_screen,
            Stream::Camera => &mut call.viewing_remote_camera,
        };
        let started = !*viewing;
        *viewing = true;
        Some(started)
    });

    match accepted {
        Some(started) => {
            echo(core, start_ok(stream), &signal);
            if started {
                tracing::info!(?stream, "remote sharing started");
                core.emit(match stream {
                    Stream::Screen => ClientEvent::IncomingScreenSharingStarted,
                    Stream::Camera => ClientEvent::IncomingCameraSharingStarted,
                });
            }
        }
        None => echo(core, start_fail(stream), &signal),
    }
    Ok(())
}

fn on_start_sharing_ok(core: &ClientCore, payload: &[u8], stream: Stream) -> Result<()> {
    let signal: Signal = serde_json::from_slice(payload)?;
    if !core.tasks.finish_task(&signal.uuid) {
        return Ok(());
    }

    let started = core.state.with(|s| {
        let call = s.active_with(&signal.sender)?;
        let sharing = match stream {
            Stream::Screen => &mut call.screen,
            Stream::Camera => &mut call.camera,
        };
        (*sharing == Sharing::Requested).then(|| *sharing = Sharing::Active)
    });
    if started.is_some() {
        tracing::info!(?stream, "sharing started");
        core.emit(stream.result_event(Ok(())));
    }
    Ok(())
}

fn on_start_sharing_fail(core: &ClientCore, payload: &[u8], stream: Stream) -> Result<()> {
    let signal: Signal = serde_json::from_slice(payload)?;
    if core.tasks.finish_task(&signal.uuid) {
        core.fail_sharing(stream, &signal.sender, RequestError::Rejected);
    }
    Ok(())
}

fn on_stop_sharing(core: &ClientCore, payload: &[u8], stream: Stream) -> Result<()> {
    let signal: Signal = serde_json::from_slice(payload)?;
    echo_if_asked(core, stop_ok(stream), &signal);

    let stopped = core.state.with(|s| {
        let call = s.active_with(&signal.sender)?;
        let viewing = match stream {
            Stream::Screen => &mut call.viewing_remote_screen,
            Stream::Camera => &mut call.viewing_remote_camera,
        };
        std::mem::take(viewing).then_some(())
    });
    if stopped.is_some() {
        tracing::info!(?stream, "remote sharing stopped");
        core.emit(match stream {
            Stream::Screen => ClientEvent::IncomingScreenSharingStopped,
            Stream::Camera => ClientEvent::IncomingCameraSharingStopped,
        });
    }
    Ok(())
}
