//! callifornia-client: encrypted voice, screen and camera calls over a
//! UDP relay.
//!
//! `CallsClient` is the entry point. Asynchronous outcomes reach the
//! embedding application through an `EventListener`; audio devices sit
//! behind the `AudioEngine` trait.

pub mod audio;
pub mod client;
mod client_core;
pub mod event;
pub mod keys;
pub mod liveness;
mod processor;
pub mod state;
pub mod task;
pub mod timer;
pub mod transport;

pub use audio::{AudioEngine, NullAudio};
pub use client::{CallsClient, VoiceInput};
pub use event::{ClientEvent, EventListener, RequestError};
pub use state::{CallError, ClientState};
