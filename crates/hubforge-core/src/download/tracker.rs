//! Per-session progress bookkeeping.
//!
//! The session task is the only writer of its snapshot. Byte counts only
//! ever move forward: a file that restarts from zero (source ignored a
//! range request) leaves the reported value flat until it catches up.

use super::events::{DownloadProgress, EventSender};
use super::session::{DownloadSession, SessionStatus};
use super::transfer::TransferUpdate;
use crate::hub::RepositoryFile;
use crate::network::ProgressThrottle;
use std::time::Duration;
use tokio::sync::watch;

pub(crate) struct SessionTracker {
    snapshot: watch::Sender<DownloadSession>,
    events: EventSender,
    throttle: ProgressThrottle,
    completed_bytes: u64,
    reported_bytes: u64,
}

impl SessionTracker {
    pub(crate) fn new(
        snapshot: watch::Sender<DownloadSession>,
        events: EventSender,
        byte_threshold: u64,
        interval: Duration,
    ) -> Self {
        Self {
            snapshot,
            events,
            throttle: ProgressThrottle::new(byte_threshold, interval),
            completed_bytes: 0,
            reported_bytes: 0,
        }
    }

    /// Record the planned file set.
    pub(crate) fn plan(&mut self, total_files: usize, total_bytes: u64) {
        self.snapshot.send_modify(|s| {
            s.total_files = total_files;
            s.total_bytes = total_bytes;
        });
    }

    pub(crate) fn set_status(&mut self, status: SessionStatus) {
        self.snapshot.send_modify(|s| s.status = status);
    }

    pub(crate) fn start_file(&mut self, file: &RepositoryFile) {
        self.snapshot
            .send_modify(|s| s.current_file = Some(file.path.clone()));
    }

    pub(crate) fn update(&mut self, update: TransferUpdate) {
        match update {
            TransferUpdate::Bytes(file_bytes) => {
                self.advance(self.completed_bytes + file_bytes);
                if self.throttle.should_emit(self.reported_bytes) {
                    self.emit();
                }
            }
            TransferUpdate::Paused => {
                self.set_status(SessionStatus::Paused);
                self.force_emit();
            }
            TransferUpdate::Resumed => self.set_status(SessionStatus::Downloading),
        }
    }

    /// Account for a finished file. `size` is its size on disk.
    pub(crate) fn finish_file(&mut self, file: &RepositoryFile, size: u64) {
        self.completed_bytes += size;
        let unlisted = file.size.is_none();
        self.snapshot.send_modify(|s| {
            s.files_completed += 1;
            if unlisted {
                s.total_bytes += size;
            }
        });
        self.advance(self.completed_bytes);
        self.force_emit();
    }

    pub(crate) fn completed_bytes(&self) -> u64 {
        self.completed_bytes
    }

    pub(crate) fn into_events(self) -> EventSender {
        self.events
    }

    fn advance(&mut self, bytes: u64) {
        if bytes > self.reported_bytes {
            self.reported_bytes = bytes;
            self.snapshot.send_modify(|s| s.bytes_downloaded = bytes);
        }
    }

    fn force_emit(&mut self) {
        self.throttle.reset();
        self.throttle.should_emit(self.reported_bytes);
        self.emit();
    }

    fn emit(&mut self) {
        let progress = DownloadProgress::from(&*self.snapshot.borrow());
        self.events.progress(progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::download::events::{DownloadEvent, DownloadStream};
    use futures::StreamExt;
    use tokio::sync::mpsc;

    fn tracker() -> (SessionTracker, DownloadStream) {
        let (tx, rx) = mpsc::channel(64);
        let (snap_tx, snap_rx) = watch::channel(DownloadSession::new("org/model", Backend::Gguf));
        let tracker = SessionTracker::new(snap_tx, EventSender::new(tx), 1, Duration::ZERO);
        (tracker, DownloadStream::new(rx, snap_rx))
    }

    async fn drain(tracker: SessionTracker, mut stream: DownloadStream) -> Vec<u64> {
        drop(tracker);
        let mut seen = Vec::new();
        while let Some(Ok(DownloadEvent::Progress(p))) = stream.next().await {
            seen.push(p.bytes_downloaded);
        }
        seen
    }

    #[tokio::test]
    async fn test_restart_keeps_progress_flat() {
        let (mut tracker, stream) = tracker();
        let file = RepositoryFile::new("a.gguf", Some(10));
        tracker.plan(1, 10);
        tracker.start_file(&file);
        tracker.update(TransferUpdate::Bytes(6));
        // Source ignored the range, file restarts
        tracker.update(TransferUpdate::Bytes(2));
        tracker.update(TransferUpdate::Bytes(8));
        tracker.finish_file(&file, 10);

        let seen = drain(tracker, stream).await;
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
        assert_eq!(seen.last(), Some(&10));
    }

    #[tokio::test]
    async fn test_unlisted_size_added_on_completion() {
        let (mut tracker, stream) = tracker();
        let listed = RepositoryFile::new("config.json", Some(4));
        let unlisted = RepositoryFile::new("model.gguf", None);
        tracker.plan(2, 4);
        tracker.finish_file(&listed, 4);
        tracker.finish_file(&unlisted, 6);

        let session = stream.session();
        assert_eq!(session.total_bytes, 10);
        assert_eq!(session.bytes_downloaded, 10);
        assert_eq!(session.files_completed, 2);
        assert_eq!(tracker.completed_bytes(), 10);
        drain(tracker, stream).await;
    }
}
