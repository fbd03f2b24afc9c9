//! Single-shot expiry timers.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Fires a callback once after a delay unless dropped first.
///
/// Dropping the timer cancels it, so whoever owns the timer owns the
/// callback's lifetime: removing a call from its table disarms its expiry.
#[derive(Debug)]
pub struct ExpiryTimer {
    handle: JoinHandle<()>,
}

impl ExpiryTimer {
    pub fn start<F>(runtime: &Handle, after: Duration, on_expiry: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = runtime.spawn(async move {
            tokio::time::sleep(after).await;
            on_expiry();
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ExpiryTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
