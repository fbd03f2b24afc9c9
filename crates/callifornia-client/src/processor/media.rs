//! Encrypted media frames from the call partner.

use anyhow::Result;

use callifornia_core::crypto::aes_stream_decrypt;
use callifornia_core::PacketType;

use super::PacketProcessor;
use crate::client_core::ClientCore;
use crate::event::ClientEvent;

pub(super) fn register(p: &mut PacketProcessor) {
    p.register(PacketType::Voice, on_voice);
    p.register(PacketType::Screen, on_screen);
    p.register(PacketType::Camera, on_camera);
}

#[derive(Clone, Copy)]
enum Gate {
    Always,
    ViewingScreen,
    ViewingCamera,
}

/// Decrypt with the active call key, if the frame is wanted at all.
fn open(core: &ClientCore, frame: &[u8], gate: Gate) -> Option<Vec<u8>> {
    let result = core.state.with(|s| {
        let call = s.active()?;
        let open = match gate {
            Gate::Always => true,
            Gate::ViewingScreen => call.viewing_remote_screen,
            Gate::ViewingCamera => call.viewing_remote_camera,
        };
        open.then(|| aes_stream_decrypt(&call.call_key, frame))
    })?;

    match result {
        Ok(plain) => Some(plain),
        Err(e) => {
            tracing::debug!(error = %e, len = frame.len(), "media frame dropped");
            None
        }
    }
}

fn on_voice(core: &ClientCore, payload: &[u8]) -> Result<()> {
    if let Some(frame) = open(core, payload, Gate::Always) {
        core.audio.play_audio(&frame);
    }
    Ok(())
}

fn on_screen(core: &ClientCore, payload: &[u8]) -> Result<()> {
    if let Some(frame) = open(core, payload, Gate::ViewingScreen) {
        core.emit(ClientEvent::IncomingScreen(frame));
    }
    Ok(())
}

fn on_camera(core: &ClientCore, payload: &[u8]) -> Result<()> {
    if let Some(frame) = open(core, payload, Gate::ViewingCamera) {
        core.emit(ClientEvent::IncomingCamera(frame));
    }
    Ok(())
}
