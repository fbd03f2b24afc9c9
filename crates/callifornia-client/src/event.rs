//! Client events and the queue that delivers them to the embedding app.
//!
//! Network-side code never calls into collaborator code directly. It pushes
//! a `ClientEvent` onto an unbounded channel; a dedicated OS thread drains
//! the channel and hands events to the `EventListener` one at a time, in
//! order. Stopping the queue delivers everything already queued, then joins
//! the thread.

use std::thread::JoinHandle;

use thiserror::Error;
use tokio::sync::mpsc;

/// Why an asynchronous request did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// No confirmation arrived before the retry budget ran out.
    #[error("network error: no response")]
    NetworkError,
    #[error("nickname is already taken")]
    TakenNickname,
    #[error("user does not exist or is offline")]
    UnexistingUser,
    #[error("request rejected by peer")]
    Rejected,
    #[error("encryption error")]
    EncryptionError,
}

/// Everything the client reports back asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    AuthorizationResult(Result<(), RequestError>),
    LogoutCompleted,

    StartCallingResult(Result<(), RequestError>),
    MaximumCallingTimeReached,
    CallingAccepted,
    CallingDeclined,

    AcceptCallResult {
        nickname: String,
        result: Result<(), RequestError>,
    },
    IncomingCall {
        nickname: String,
    },
    IncomingCallExpired {
        nickname: String,
    },
    RemoteUserEndedCall,

    StartScreenSharingResult(Result<(), RequestError>),
    IncomingScreenSharingStarted,
    IncomingScreenSharingStopped,
    IncomingScreen(Vec<u8>),

    StartCameraSharingResult(Result<(), RequestError>),
    IncomingCameraSharingStarted,
    IncomingCameraSharingStopped,
    IncomingCamera(Vec<u8>),

    /// Liveness lost. All session state has been reset to unauthorized.
    ConnectionDown,
    ConnectionRestored,
}

/// Receives client events on the event thread.
pub trait EventListener: Send + 'static {
    fn on_event(&mut self, event: ClientEvent);
}

impl<F> EventListener for F
where
    F: FnMut(ClientEvent) + Send + 'static,
{
    fn on_event(&mut self, event: ClientEvent) {
        self(event)
    }
}

enum Queued {
    Event(ClientEvent),
    Stop,
}

/// Producer side. Cheap to clone; never blocks.
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<Queued>,
}

impl EventQueue {
    pub fn push(&self, event: ClientEvent) {
        if self.tx.send(Queued::Event(event)).is_err() {
            tracing::trace!("event queue closed, dropping event");
        }
    }
}

/// Consumer side: the drain thread.
pub struct EventDrain {
    tx: mpsc::UnboundedSender<Queued>,
    thread: JoinHandle<()>,
}

impl EventDrain {
    /// Spawn the drain thread for `listener`.
    pub fn spawn<L: EventListener>(mut listener: L) -> std::io::Result<(EventQueue, EventDrain)> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Queued>();

        let thread = std::thread::Builder::new()
            .name("callifornia-events".into())
            .spawn(move || {
                while let Some(item) = rx.blocking_recv() {
                    match item {
                        Queued::Event(event) => listener.on_event(event),
                        Queued::Stop => break,
                    }
                }
                tracing::debug!("event thread exiting");
            })?;

        Ok((EventQueue { tx: tx.clone() }, EventDrain { tx, thread }))
    }

    /// Deliver everything queued so far, then join the thread.
    ///
    /// Blocks; call from a blocking context.
    pub fn stop(self) {
        let _ = self.tx.send(Queued::Stop);
        if self.thread.join().is_err() {
            tracing::error!("event listener panicked");
        }
    }
}
