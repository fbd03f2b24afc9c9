//! Relay responses and liveness.

use anyhow::Result;
use bytes::Bytes;

use callifornia_core::crypto::deserialize_public_key;
use callifornia_core::packet::FriendInfo;
use callifornia_core::PacketType;

use super::PacketProcessor;
use crate::client_core::ClientCore;
use crate::event::{ClientEvent, RequestError};

pub(super) fn register(p: &mut PacketProcessor) {
    p.register(PacketType::Ping, on_ping);
    p.register(PacketType::PingSuccess, on_ping_success);
    p.register(PacketType::AuthorizeSuccess, on_authorize_success);
    p.register(PacketType::AuthorizeFail, on_authorize_fail);
    p.register(PacketType::LogoutOk, on_logout_ok);
    p.register(PacketType::GetFriendInfoSuccess, on_friend_info);
    p.register(PacketType::GetFriendInfoFail, on_unexisting_user);
    p.register(PacketType::StartCallingFail, on_unexisting_user);
}

fn on_ping(core: &ClientCore, _payload: &[u8]) -> Result<()> {
    core.send_raw(PacketType::PingSuccess, Bytes::new());
    Ok(())
}

fn on_ping_success(core: &ClientCore, _payload: &[u8]) -> Result<()> {
    core.liveness.record_success();
    Ok(())
}

fn on_authorize_success(core: &ClientCore, payload: &[u8]) -> Result<()> {
    if core.resolve(payload)?.is_none() {
        return Ok(());
    }
    if core.state.with(|s| s.finish_authorization()) {
        tracing::info!(nickname = ?core.state.lock().nickname(), "authorized");
        core.emit(ClientEvent::AuthorizationResult(Ok(())));
    }
    Ok(())
}

fn on_authorize_fail(core: &ClientCore, payload: &[u8]) -> Result<()> {
    if core.resolve(payload)?.is_none() {
        return Ok(());
    }
    if core.state.with(|s| s.abort_authorization()) {
        tracing::info!("nickname taken");
        core.emit(ClientEvent::AuthorizationResult(Err(RequestError::TakenNickname)));
    }
    Ok(())
}

fn on_logout_ok(core: &ClientCore, payload: &[u8]) -> Result<()> {
    if core.resolve(payload)?.is_some() {
        core.emit(ClientEvent::LogoutCompleted);
    }
    Ok(())
}

/// The callee's public key arrived: send the actual offer.
fn on_friend_info(core: &ClientCore, payload: &[u8]) -> Result<()> {
    let info: FriendInfo = serde_json::from_slice(payload)?;
    if !core.tasks.finish_task(&info.uuid) {
        return Ok(());
    }

    let Some(keys) = core.keys.try_keys() else {
        core.fail_outgoing(&info.uuid, RequestError::EncryptionError);
        return Ok(());
    };
    let peer_key = match deserialize_public_key(&info.public_key) {
        Ok(k) => k,
        Err(e) => {
            tracing::warn!(error = %e, "callee public key unusable");
            core.fail_outgoing(&info.uuid, RequestError::EncryptionError);
            return Ok(());
        }
    };

    let sent = core.state.with(|s| {
        let me = s.nickname()?.to_string();
        let call = s.outgoing_mut()?;
        if call.pending_request.as_deref() != Some(info.uuid.as_str()) || call.nickname_hash != info.target {
            return None;
        }
        call.peer_public_key = Some(peer_key);
        Some(core.send_call_offer(call, &me, &keys))
    });

    if let Some(Err(e)) = sent {
        tracing::warn!(error = %e, "call offer could not be built");
        core.fail_outgoing(&info.uuid, RequestError::EncryptionError);
    }
    Ok(())
}

fn on_unexisting_user(core: &ClientCore, payload: &[u8]) -> Result<()> {
    if let Some(uuid) = core.resolve(payload)? {
        core.fail_outgoing(&uuid, RequestError::UnexistingUser);
    }
    Ok(())
}
