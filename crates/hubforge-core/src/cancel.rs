//! Cooperative cancellation and pause control for download sessions.
//!
//! A [`CancellationToken`] is checked by the transfer loop between chunks and
//! between files. It can also be awaited, so a session waiting for an
//! admission slot or sleeping before a retry wakes up as soon as it is
//! cancelled.

use crate::error::HubError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Flag {
    set: AtomicBool,
    notify: Notify,
}

impl Flag {
    fn store(&self, value: bool) {
        self.set.store(value, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn load(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    async fn wait_for(&self, value: bool) {
        loop {
            let notified = self.notify.notified();
            if self.load() == value {
                return;
            }
            notified.await;
        }
    }
}

/// A cancellation token for cooperative cancellation of async operations.
///
/// Clones share state: cancelling any clone cancels all of them.
///
/// # Example
///
/// ```
/// use hubforge_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let token_clone = token.clone();
///
/// token_clone.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Flag>,
}

impl CancellationToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.inner.store(true);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.load()
    }

    /// Return [`HubError::Cancelled`] if cancellation has been requested.
    pub fn check(&self) -> Result<(), HubError> {
        if self.is_cancelled() {
            Err(HubError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        self.inner.wait_for(true).await;
    }
}

/// Pause flag shared between the coordinator and a running session.
#[derive(Debug, Clone, Default)]
pub struct PauseToken {
    inner: Arc<Flag>,
}

impl PauseToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.inner.store(true);
    }

    pub fn resume(&self) {
        self.inner.store(false);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.load()
    }

    /// Wait until the session is resumed.
    pub async fn resumed(&self) {
        self.inner.wait_for(false).await;
    }
}
