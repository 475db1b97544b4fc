//! Download event stream.
//!
//! Each session produces `Progress` events followed by at most one terminal
//! item: `Completed` on success, an `Err` on failure, nothing on
//! cancellation. The stream ends right after the terminal item.
//!
//! Progress goes through a bounded channel without ever blocking the
//! transfer: when the consumer lags and the channel is full, the newest
//! value is parked and replaces any older parked value. The parked value is
//! delivered before the terminal item.

use super::session::{DownloadSession, SessionStatus};
use crate::backend::Backend;
use crate::error::Result;
use crate::metadata::ModelRecord;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};

/// Progress of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub files_completed: usize,
    pub total_files: usize,
    pub current_file: Option<String>,
}

impl From<&DownloadSession> for DownloadProgress {
    fn from(session: &DownloadSession) -> Self {
        Self {
            bytes_downloaded: session.bytes_downloaded,
            total_bytes: session.total_bytes,
            files_completed: session.files_completed,
            total_files: session.total_files,
            current_file: session.current_file.clone(),
        }
    }
}

/// One item of a [`DownloadStream`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    Progress(DownloadProgress),
    /// Terminal. Carries the finalized record.
    Completed(ModelRecord),
}

/// Producer half, owned by the session task.
pub(crate) struct EventSender {
    tx: mpsc::Sender<Result<DownloadEvent>>,
    parked: Option<DownloadProgress>,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::Sender<Result<DownloadEvent>>) -> Self {
        Self { tx, parked: None }
    }

    /// Queue a progress value without waiting.
    pub(crate) fn progress(&mut self, progress: DownloadProgress) {
        self.parked = Some(progress);
        self.flush_parked();
    }

    fn flush_parked(&mut self) {
        if let Some(progress) = self.parked.take() {
            let event = DownloadEvent::Progress(progress.clone());
            if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(Ok(event)) {
                self.parked = Some(progress);
            }
        }
    }

    /// Deliver the parked progress value, then the terminal item.
    pub(crate) async fn finish(mut self, terminal: Result<DownloadEvent>) {
        if let Some(progress) = self.parked.take() {
            let _ = self.tx.send(Ok(DownloadEvent::Progress(progress))).await;
        }
        let _ = self.tx.send(terminal).await;
    }
}

/// Consumer half returned by the coordinator.
///
/// Dropping the stream does not stop the download; use the coordinator's
/// `cancel` for that.
#[derive(Debug)]
pub struct DownloadStream {
    events: mpsc::Receiver<Result<DownloadEvent>>,
    session: watch::Receiver<DownloadSession>,
}

impl DownloadStream {
    pub(crate) fn new(
        events: mpsc::Receiver<Result<DownloadEvent>>,
        session: watch::Receiver<DownloadSession>,
    ) -> Self {
        Self { events, session }
    }

    pub fn repo_id(&self) -> String {
        self.session.borrow().repo_id.clone()
    }

    pub fn backend(&self) -> Backend {
        self.session.borrow().backend
    }

    /// Current status. Terminal once the stream has ended.
    pub fn status(&self) -> SessionStatus {
        self.session.borrow().status
    }

    /// Latest session snapshot.
    pub fn session(&self) -> DownloadSession {
        self.session.borrow().clone()
    }

    /// Drain the stream.
    ///
    /// Returns the record on success and `None` when the session was
    /// cancelled.
    pub async fn wait(mut self) -> Result<Option<ModelRecord>> {
        while let Some(item) = self.next().await {
            if let DownloadEvent::Completed(record) = item? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

impl Stream for DownloadStream {
    type Item = Result<DownloadEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}
