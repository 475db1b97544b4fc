//! Per-backend file selection.
//!
//! A [`FileSelector`] reduces a full repository listing to the minimal,
//! non-duplicated [`CandidateSet`] a backend needs. Selectors are pure:
//! the same files in any order yield the same set, sorted by path.
//!
//! - [`safetensors`] - weights plus config and tokenizer companions
//! - [`gguf`] - quantized weight files plus companions
//! - [`packaged`] - variant-aware selection for packaged/archive models

mod gguf;
mod packaged;
mod safetensors;

pub use gguf::GgufSelector;
pub(crate) use gguf::is_projector;
pub use packaged::PackagedSelector;
pub use safetensors::SafetensorsSelector;

use crate::backend::Backend;
use crate::hub::{sum_known_sizes, RepositoryFile};

/// Ordered set of files believed sufficient for one backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    files: Vec<RepositoryFile>,
}

impl CandidateSet {
    /// Build a set, sorting by path and dropping duplicate paths.
    pub fn new(mut files: Vec<RepositoryFile>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.path == b.path);
        Self { files }
    }

    pub fn files(&self) -> &[RepositoryFile] {
        &self.files
    }

    pub fn into_files(self) -> Vec<RepositoryFile> {
        self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sum of the sizes the listing reported.
    pub fn known_size(&self) -> u64 {
        sum_known_sizes(&self.files).0
    }

    /// Number of files whose size the listing omitted.
    pub fn unknown_size_count(&self) -> usize {
        sum_known_sizes(&self.files).1
    }

    /// Keep only the files accepted by `keep`.
    pub fn retain(&mut self, keep: impl FnMut(&RepositoryFile) -> bool) {
        self.files.retain(keep);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.iter().any(|f| f.path == path)
    }
}

/// Reduces a repository listing to the files one backend needs.
pub trait FileSelector: Send + Sync {
    /// Select candidates. Never fails: an empty set means nothing usable.
    fn select(&self, files: &[RepositoryFile]) -> CandidateSet;
}

/// Selector for `backend`, or `None` for backends that download nothing.
pub fn selector_for(backend: Backend) -> Option<Box<dyn FileSelector>> {
    match backend {
        Backend::Mlx => Some(Box::new(SafetensorsSelector)),
        Backend::Gguf => Some(Box::new(GgufSelector)),
        Backend::CoreMl => Some(Box::new(PackagedSelector)),
        Backend::Remote => None,
    }
}
