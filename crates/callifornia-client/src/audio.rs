//! Audio collaborator boundary.
//!
//! The client never touches a device. Decrypted inbound voice goes to
//! `AudioEngine::play_audio`; captured microphone frames come back in
//! through `CallsClient::on_input_voice` or a `VoiceInput` handle.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

/// Highest accepted volume, in percent.
pub const MAX_VOLUME: u8 = 200;

/// Playback and capture device owned by the embedding application.
///
/// Called from the dispatcher task; implementations must not block.
pub trait AudioEngine: Send + Sync {
    /// A call became active. Start capture and playback.
    fn start_stream(&self);

    /// The active call ended.
    fn stop_stream(&self);

    /// Play one decrypted voice frame.
    fn play_audio(&self, frame: &[u8]);

    fn set_muted(&self, muted: bool);
    fn is_muted(&self) -> bool;

    /// Set playback volume in percent, `0..=MAX_VOLUME`.
    fn set_volume(&self, volume: u8);
    fn volume(&self) -> u8;
}

/// Engine with no device behind it. Tracks settings and discards audio.
#[derive(Debug)]
pub struct NullAudio {
    streaming: AtomicBool,
    muted: AtomicBool,
    volume: AtomicU8,
    frames_played: AtomicUsize,
}

impl Default for NullAudio {
    fn default() -> Self {
        Self::new(100, false)
    }
}

impl NullAudio {
    pub fn new(volume: u8, muted: bool) -> Self {
        Self {
            streaming: AtomicBool::new(false),
            muted: AtomicBool::new(muted),
            volume: AtomicU8::new(volume.min(MAX_VOLUME)),
            frames_played: AtomicUsize::new(0),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Relaxed)
    }

    pub fn frames_played(&self) -> usize {
        self.frames_played.load(Ordering::Relaxed)
    }
}

impl AudioEngine for NullAudio {
    fn start_stream(&self) {
        self.streaming.store(true, Ordering::Relaxed);
    }

    fn stop_stream(&self) {
        self.streaming.store(false, Ordering::Relaxed);
    }

    fn play_audio(&self, _frame: &[u8]) {
        self.frames_played.fetch_add(1, Ordering::Relaxed);
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    fn set_volume(&self, volume: u8) {
        self.volume.store(volume.min(MAX_VOLUME), Ordering::Relaxed);
    }

    fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }
}
