//! Per-session RSA keypair lifecycle.
//!
//! Generating a 3072-bit key takes long enough that it runs on the blocking
//! pool. State is published through a `watch` channel so any number of
//! waiters can block on the same generation.

use std::sync::Arc;

use callifornia_core::KeyPair;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub enum KeyState {
    NotGenerated,
    Generating,
    Ready(Arc<KeyPair>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("keys have not been generated")]
    NotGenerated,
    #[error("key manager closed")]
    Closed,
}

#[derive(Clone)]
pub struct KeyManager {
    state: Arc<watch::Sender<KeyState>>,
    bits: usize,
    runtime: Handle,
}

impl KeyManager {
    pub fn new(bits: usize, runtime: Handle) -> Self {
        let (tx, _rx) = watch::channel(KeyState::NotGenerated);
        Self {
            state: Arc::new(tx),
            bits,
            runtime,
        }
    }

    /// Start generating a keypair unless one exists or is in progress.
    pub fn generate_keys(&self) {
        let started = self.state.send_if_modified(|state| match state {
            KeyState::NotGenerated => {
                *state = KeyState::Generating;
                true
            }
            _ => false,
        });
        if !started {
            return;
        }

        let state = self.state.clone();
        let bits = self.bits;
        self.runtime.spawn_blocking(move || {
            let next = match KeyPair::generate_with_bits(bits) {
                Ok(pair) => {
                    tracing::debug!(bits, "session keypair generated");
                    KeyState::Ready(Arc::new(pair))
                }
                Err(e) => {
                    tracing::error!(error = %e, bits, "keypair generation failed");
                    KeyState::NotGenerated
                }
            };
            state.send_replace(next);
        });
    }

    /// Wait for the current generation to finish and return the keys.
    pub async fn keys(&self) -> Result<Arc<KeyPair>, KeyError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|s| !matches!(s, KeyState::Generating))
            .await
            .map_err(|_| KeyError::Closed)?;
        match &*state {
            KeyState::Ready(pair) => Ok(pair.clone()),
            _ => Err(KeyError::NotGenerated),
        }
    }

    pub fn try_keys(&self) -> Option<Arc<KeyPair>> {
        match &*self.state.borrow() {
            KeyState::Ready(pair) => Some(pair.clone()),
            _ => None,
        }
    }

    pub fn is_generating(&self) -> bool {
        matches!(&*self.state.borrow(), KeyState::Generating)
    }

    /// Drop the keypair now. False, and nothing changed, while a
    /// generation is in flight.
    pub fn try_reset(&self) -> bool {
        let mut generating = false;
        self.state.send_if_modified(|state| match state {
            KeyState::Generating => {
                generating = true;
                false
            }
            KeyState::Ready(_) => {
                *state = KeyState::NotGenerated;
                true
            }
            KeyState::NotGenerated => false,
        });
        !generating
    }

    /// Drop the keypair. An in-flight generation is waited out first so
    /// its result cannot resurrect the old keys.
    pub async fn reset(&self) {
        let mut rx = self.state.subscribe();
        while !self.try_reset() {
            if rx.wait_for(|s| !matches!(s, KeyState::Generating)).await.is_err() {
                return;
            }
        }
    }
}
