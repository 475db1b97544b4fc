//! Download session state.

use crate::backend::Backend;
use serde::{Deserialize, Serialize};

/// Lifecycle of a download session.
///
/// `NotStarted` covers the time spent waiting for an admission slot.
/// `Paused` is a substate of `Downloading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    /// Whether no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::NotStarted => "not_started",
            SessionStatus::Downloading => "downloading",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Snapshot of one (repository, backend) download.
///
/// Only the session's own task writes these; callers receive copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSession {
    pub repo_id: String,
    pub backend: Backend,
    pub status: SessionStatus,
    pub bytes_downloaded: u64,
    /// Sum of the listed sizes. Files listed without a size are added once
    /// they complete.
    pub total_bytes: u64,
    pub files_completed: usize,
    pub total_files: usize,
    /// File currently being transferred.
    pub current_file: Option<String>,
}

impl DownloadSession {
    pub(crate) fn new(repo_id: &str, backend: Backend) -> Self {
        Self {
            repo_id: repo_id.to_string(),
            backend,
            status: SessionStatus::NotStarted,
            bytes_downloaded: 0,
            total_bytes: 0,
            files_completed: 0,
            total_files: 0,
            current_file: None,
        }
    }

    /// Fraction complete in `0.0..=1.0`, when the total is known.
    pub fn progress(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        Some((self.bytes_downloaded as f64 / self.total_bytes as f64).min(1.0))
    }
}
