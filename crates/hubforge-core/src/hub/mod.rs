//! Boundary with the remote model hub.
//!
//! The engine only consumes the [`RepositoryClient`] trait: list a
//! repository, stream the bytes of one file (optionally from an offset) and
//! fetch the model card. [`HttpRepositoryClient`] implements it against the
//! Hugging Face Hub HTTP API.
//!
//! - [`http`] - `reqwest`-based client
//! - [`auth`] - Access token resolution

mod auth;
mod http;

pub use auth::resolve_token;
pub use http::HttpRepositoryClient;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// One file in a repository listing.
///
/// `size` is `None` when the listing omits it. That is a different fact
/// from `Some(0)` and is never coerced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryFile {
    /// Repository-relative path using `/` separators.
    pub path: String,
    /// Size in bytes, if the listing reports it.
    pub size: Option<u64>,
    /// Content checksum (LFS SHA-256 or git blob id), if reported.
    pub checksum: Option<String>,
}

impl RepositoryFile {
    /// Create a file entry with an optional size and no checksum.
    pub fn new(path: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            path: path.into(),
            size,
            checksum: None,
        }
    }

    /// Attach a checksum.
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Last path segment.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// First path segment when the file lives in a subdirectory.
    pub fn top_level_dir(&self) -> Option<&str> {
        self.path.split_once('/').map(|(top, _)| top)
    }

    /// Whether the file sits at the repository root.
    pub fn is_root_level(&self) -> bool {
        !self.path.contains('/')
    }

    /// The checksum, if it is a SHA-256 hex digest.
    pub fn sha256(&self) -> Option<&str> {
        self.checksum
            .as_deref()
            .filter(|c| c.len() == 64 && c.chars().all(|ch| ch.is_ascii_hexdigit()))
    }
}

/// Sum of the known sizes and the number of files whose size is unknown.
pub fn sum_known_sizes(files: &[RepositoryFile]) -> (u64, usize) {
    files.iter().fold((0, 0), |(sum, unknown), f| match f.size {
        Some(size) => (sum + size, unknown),
        None => (sum, unknown + 1),
    })
}

/// A fetched file body.
pub struct FetchedBody {
    /// Offset of the first streamed byte. Zero when the source ignored a
    /// requested range and is sending the whole file.
    pub offset: u64,
    /// Total length of the file, when known.
    pub total_len: Option<u64>,
    /// The byte chunks.
    pub stream: BoxStream<'static, Result<Bytes>>,
}

impl std::fmt::Debug for FetchedBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedBody")
            .field("offset", &self.offset)
            .field("total_len", &self.total_len)
            .finish()
    }
}

/// Read access to a remote model repository.
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// List every file in `repo_id` at `revision`.
    async fn list_files(&self, repo_id: &str, revision: &str) -> Result<Vec<RepositoryFile>>;

    /// Stream the bytes of `path`, starting at `offset` when non-zero.
    async fn fetch(
        &self,
        repo_id: &str,
        path: &str,
        revision: &str,
        offset: u64,
    ) -> Result<FetchedBody>;

    /// Raw model card text at `revision`, or `None` when the repository has none.
    async fn model_card(&self, repo_id: &str, revision: &str) -> Result<Option<String>>;
}
