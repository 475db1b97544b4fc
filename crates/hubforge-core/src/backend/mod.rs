//! Runtime backends and the file patterns that identify them.
//!
//! - [`pattern`] - Case-insensitive glob patterns compiled to regexes
//! - [`detector`] - Classifies a repository listing into supported backends

mod detector;
mod pattern;

pub use detector::BackendDetector;
pub use pattern::FilePattern;

use crate::config::StorageConfig;
use crate::error::HubError;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Target runtime model format.
///
/// Variants are declared in alphabetical order of their wire names, so the
/// derived `Ord` sorts backends the way detection results are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Packaged / archive-based models (Core ML `.mlmodelc`, `.mlpackage`).
    CoreMl,
    /// Single-file quantized weights (`.gguf`).
    Gguf,
    /// Safetensors weights plus a model configuration.
    Mlx,
    /// Served by a remote endpoint; nothing to download.
    Remote,
}

/// Required pattern groups per backend. Every group must be satisfied by at
/// least one file for the backend to be reported.
const MLX_REQUIRED: &[&[&str]] = &[&["*.safetensors"], &["config.json"]];
const GGUF_REQUIRED: &[&[&str]] = &[&["*.gguf"]];
const COREML_REQUIRED: &[&[&str]] = &[&[
    "**/*.mlmodelc/**",
    "**/*.mlpackage/**",
    "*.mlmodelc.zip",
    "*.mlpackage.zip",
    "*coreml*.zip",
    "*coreml*.tar.gz",
    "*coreml*.tgz",
    "*coreml*.tar.zst",
]];

/// Config, tokenizer and vocabulary files that accompany weights.
const COMPANION_PATTERNS: &[&str] = &[
    "config.json",
    "generation_config.json",
    "tokenizer.json",
    "tokenizer_config.json",
    "tokenizer.model",
    "special_tokens_map.json",
    "added_tokens.json",
    "vocab.json",
    "vocab.txt",
    "merges.txt",
    "preprocessor_config.json",
    "chat_template.jinja",
    "chat_template.json",
    "*.safetensors.index.json",
];

/// Small root-level files shared by every variant of a packaged model.
const PACKAGED_SHARED_PATTERNS: &[&str] = &[
    "*.json",
    "merges.txt",
    "vocab.txt",
    "*.model",
    "*.tiktoken",
];

fn compile_groups(groups: &[&[&str]]) -> Vec<Vec<FilePattern>> {
    groups
        .iter()
        .map(|group| group.iter().map(|g| FilePattern::new(g)).collect())
        .collect()
}

fn compile_list(list: &[&str]) -> Vec<FilePattern> {
    list.iter().map(|g| FilePattern::new(g)).collect()
}

static MLX_GROUPS: LazyLock<Vec<Vec<FilePattern>>> = LazyLock::new(|| compile_groups(MLX_REQUIRED));
static GGUF_GROUPS: LazyLock<Vec<Vec<FilePattern>>> =
    LazyLock::new(|| compile_groups(GGUF_REQUIRED));
static COREML_GROUPS: LazyLock<Vec<Vec<FilePattern>>> =
    LazyLock::new(|| compile_groups(COREML_REQUIRED));
static COMPANIONS: LazyLock<Vec<FilePattern>> = LazyLock::new(|| compile_list(COMPANION_PATTERNS));
static PACKAGED_SHARED: LazyLock<Vec<FilePattern>> =
    LazyLock::new(|| compile_list(PACKAGED_SHARED_PATTERNS));

impl Backend {
    /// All backends, alphabetically.
    pub const ALL: [Backend; 4] = [Backend::CoreMl, Backend::Gguf, Backend::Mlx, Backend::Remote];

    /// Canonical lowercase name, also used as the storage directory name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::CoreMl => "coreml",
            Backend::Gguf => "gguf",
            Backend::Mlx => "mlx",
            Backend::Remote => "remote",
        }
    }

    /// Required pattern groups. Empty for [`Backend::Remote`].
    pub fn required_patterns(&self) -> &'static [Vec<FilePattern>] {
        match self {
            Backend::CoreMl => COREML_GROUPS.as_slice(),
            Backend::Gguf => GGUF_GROUPS.as_slice(),
            Backend::Mlx => MLX_GROUPS.as_slice(),
            Backend::Remote => &[],
        }
    }

    /// Optional companion patterns fetched alongside the weights.
    pub fn optional_patterns(&self) -> &'static [FilePattern] {
        match self {
            Backend::CoreMl => PACKAGED_SHARED.as_slice(),
            Backend::Gguf | Backend::Mlx => COMPANIONS.as_slice(),
            Backend::Remote => &[],
        }
    }

    /// Whether the weight-defining files match any required pattern.
    pub fn matches_weights(&self, path: &str) -> bool {
        self.required_patterns()
            .first()
            .is_some_and(|group| group.iter().any(|p| p.matches(path)))
    }

    /// Whether this backend ships as archives that are unpacked at finalization.
    pub fn is_archive_based(&self) -> bool {
        matches!(self, Backend::CoreMl)
    }

    /// Whether files can be downloaded for this backend at all.
    pub fn is_downloadable(&self) -> bool {
        !matches!(self, Backend::Remote)
    }

    /// Multiplier applied to the candidate size when checking free space.
    ///
    /// Archive backends need room for the archive and its extracted contents.
    pub fn disk_space_multiplier(&self) -> f64 {
        if self.is_archive_based() {
            StorageConfig::ARCHIVE_SPACE_MULTIPLIER
        } else {
            StorageConfig::DEFAULT_SPACE_MULTIPLIER
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Backend {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "coreml" => Ok(Backend::CoreMl),
            "gguf" => Ok(Backend::Gguf),
            "mlx" | "safetensors" => Ok(Backend::Mlx),
            "remote" => Ok(Backend::Remote),
            other => Err(HubError::Validation {
                field: "backend".to_string(),
                message: format!("unknown backend '{}'", other),
            }),
        }
    }
}

/// Whether `path` is a config/tokenizer/vocabulary companion file.
pub(crate) fn is_companion_file(path: &str) -> bool {
    COMPANIONS.iter().any(|p| p.matches(path))
}
