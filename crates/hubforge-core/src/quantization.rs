//! Quantization variant analysis for single-file weight repositories.
//!
//! GGUF repositories typically ship one architecture many times over, each
//! copy quantized to a different level (`Q4_K_M`, `Q8_0`, ...). This module
//! parses the level from each path, groups shards of the same variant,
//! estimates the memory each variant needs at runtime and picks the best one
//! for a memory budget.

use crate::config::SelectionConfig;
use crate::hub::{sum_known_sizes, RepositoryFile};
use crate::selector::is_projector;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// A llama.cpp quantization level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QuantizationLevel {
    Iq1S,
    Iq1M,
    Iq2Xxs,
    Iq2Xs,
    Iq2S,
    Iq2M,
    Q2K,
    Iq3Xxs,
    Iq3Xs,
    Iq3S,
    Iq3M,
    Q3KS,
    Q3KM,
    Q3KL,
    Iq4Xs,
    Iq4Nl,
    Q4_0,
    Q4_1,
    Q4KS,
    Q4KM,
    Q5_0,
    Q5_1,
    Q5KS,
    Q5KM,
    Q6K,
    Q8_0,
    Bf16,
    F16,
    F32,
}

/// Filename tokens. Aliases map onto the same level.
const LEVEL_TOKENS: &[(&str, QuantizationLevel)] = &[
    ("IQ1_S", QuantizationLevel::Iq1S),
    ("IQ1_M", QuantizationLevel::Iq1M),
    ("IQ2_XXS", QuantizationLevel::Iq2Xxs),
    ("IQ2_XS", QuantizationLevel::Iq2Xs),
    ("IQ2_S", QuantizationLevel::Iq2S),
    ("IQ2_M", QuantizationLevel::Iq2M),
    ("Q2_K", QuantizationLevel::Q2K),
    ("IQ3_XXS", QuantizationLevel::Iq3Xxs),
    ("IQ3_XS", QuantizationLevel::Iq3Xs),
    ("IQ3_S", QuantizationLevel::Iq3S),
    ("IQ3_M", QuantizationLevel::Iq3M),
    ("Q3_K_S", QuantizationLevel::Q3KS),
    ("Q3_K_M", QuantizationLevel::Q3KM),
    ("Q3_K_L", QuantizationLevel::Q3KL),
    ("IQ4_XS", QuantizationLevel::Iq4Xs),
    ("IQ4_NL", QuantizationLevel::Iq4Nl),
    ("Q4_0", QuantizationLevel::Q4_0),
    ("Q4_1", QuantizationLevel::Q4_1),
    ("Q4_K_S", QuantizationLevel::Q4KS),
    ("Q4_K_M", QuantizationLevel::Q4KM),
    ("Q5_0", QuantizationLevel::Q5_0),
    ("Q5_1", QuantizationLevel::Q5_1),
    ("Q5_K_S", QuantizationLevel::Q5KS),
    ("Q5_K_M", QuantizationLevel::Q5KM),
    ("Q6_K", QuantizationLevel::Q6K),
    ("Q8_0", QuantizationLevel::Q8_0),
    ("BF16", QuantizationLevel::Bf16),
    ("F16", QuantizationLevel::F16),
    ("FP16", QuantizationLevel::F16),
    ("F32", QuantizationLevel::F32),
    ("FP32", QuantizationLevel::F32),
];

static SHARD_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)-\d{5}-of-\d{5}(\.gguf)$").expect("static regex is valid")
});

fn is_bounded(bytes: &[u8], start: usize, end: usize) -> bool {
    let before = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
    let after = end == bytes.len() || !bytes[end].is_ascii_alphanumeric();
    before && after
}

impl QuantizationLevel {
    /// Canonical token.
    pub fn as_str(&self) -> &'static str {
        LEVEL_TOKENS
            .iter()
            .find(|(_, level)| level == self)
            .map(|(token, _)| *token)
            .unwrap_or("unknown")
    }

    /// Average bits per weight (llama.cpp figures).
    pub fn bits_per_weight(&self) -> f64 {
        match self {
            Self::Iq1S => 1.56,
            Self::Iq1M => 1.75,
            Self::Iq2Xxs => 2.06,
            Self::Iq2Xs => 2.31,
            Self::Iq2S => 2.50,
            Self::Iq2M => 2.70,
            Self::Q2K => 3.35,
            Self::Iq3Xxs => 3.06,
            Self::Iq3Xs => 3.30,
            Self::Iq3S => 3.44,
            Self::Iq3M => 3.66,
            Self::Q3KS => 3.50,
            Self::Q3KM => 3.91,
            Self::Q3KL => 4.27,
            Self::Iq4Xs => 4.25,
            Self::Iq4Nl => 4.50,
            Self::Q4_0 => 4.55,
            Self::Q4_1 => 5.00,
            Self::Q4KS => 4.58,
            Self::Q4KM => 4.85,
            Self::Q5_0 => 5.50,
            Self::Q5_1 => 6.00,
            Self::Q5KS => 5.54,
            Self::Q5KM => 5.69,
            Self::Q6K => 6.56,
            Self::Q8_0 => 8.50,
            Self::Bf16 | Self::F16 => 16.0,
            Self::F32 => 32.0,
        }
    }

    /// Quality in `[0, 1]`, increasing with bits per weight. F32 scores 1.0.
    pub fn quality_score(&self) -> f64 {
        (self.bits_per_weight().log2() / 5.0).clamp(0.0, 1.0)
    }

    /// Level named in `path`, if any.
    ///
    /// Only tokens bounded by non-alphanumeric characters count, and the
    /// longest one wins, so `Q4_K_M` beats `Q4_K` and `BF16` never reads
    /// as `F16`.
    pub fn from_path(path: &str) -> Option<Self> {
        let upper = path.to_uppercase();
        let bytes = upper.as_bytes();
        LEVEL_TOKENS
            .iter()
            .filter(|(token, _)| {
                upper
                    .match_indices(token)
                    .any(|(start, _)| is_bounded(bytes, start, start + token.len()))
            })
            .max_by_key(|(token, _)| token.len())
            .map(|(_, level)| *level)
    }
}

impl std::fmt::Display for QuantizationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QuantizationLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        LEVEL_TOKENS
            .iter()
            .find(|(token, _)| *token == upper)
            .map(|(_, level)| *level)
            .ok_or(())
    }
}

/// One quantized variant of a model, covering all of its shards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationInfo {
    pub level: QuantizationLevel,
    /// First shard (or the only file) of the variant.
    pub source_file: RepositoryFile,
    /// Every file of the variant, sorted by path.
    pub files: Vec<RepositoryFile>,
    /// Runtime memory estimate. `None` when any file's size is unknown.
    pub estimated_memory_bytes: Option<u64>,
    pub quality_score: f64,
}

impl QuantizationInfo {
    /// Total on-disk size, if every file's size is known.
    pub fn total_size(&self) -> Option<u64> {
        match sum_known_sizes(&self.files) {
            (total, 0) => Some(total),
            _ => None,
        }
    }
}

/// Parses and ranks quantization variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuantizationAnalyzer;

impl QuantizationAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// One [`QuantizationInfo`] per quantized variant in `files`.
    ///
    /// Vision projectors and files without a recognizable level are
    /// skipped. Output is sorted by level, then path.
    pub fn analyze(&self, files: &[RepositoryFile]) -> Vec<QuantizationInfo> {
        let mut groups: BTreeMap<(QuantizationLevel, String), Vec<RepositoryFile>> =
            BTreeMap::new();
        for file in files {
            if !file.path.to_lowercase().ends_with(".gguf") || is_projector(file) {
                continue;
            }
            let Some(level) = QuantizationLevel::from_path(&file.path) else {
                continue;
            };
            let key = SHARD_SUFFIX.replace(&file.path, "$1").into_owned();
            groups.entry((level, key)).or_default().push(file.clone());
        }

        groups
            .into_iter()
            .filter_map(|((level, _), mut files)| {
                files.sort_by(|a, b| a.path.cmp(&b.path));
                let source_file = files.first()?.clone();
                let estimated_memory_bytes = match sum_known_sizes(&files) {
                    (total, 0) => Some(
                        (total as f64 * SelectionConfig::RUNTIME_OVERHEAD_MULTIPLIER).round()
                            as u64,
                    ),
                    _ => None,
                };
                Some(QuantizationInfo {
                    level,
                    source_file,
                    files,
                    estimated_memory_bytes,
                    quality_score: level.quality_score(),
                })
            })
            .collect()
    }
}

/// Highest-quality candidate that fits `available_memory` and meets
/// `minimum_quality`.
///
/// Ties go to the smaller variant, then to the lexicographically smaller
/// path. Candidates with no memory estimate are never chosen.
pub fn get_best_quantization(
    candidates: &[QuantizationInfo],
    available_memory: u64,
    minimum_quality: f64,
) -> Option<&QuantizationInfo> {
    candidates
        .iter()
        .filter(|c| c.quality_score >= minimum_quality)
        .filter(|c| c.estimated_memory_bytes.is_some_and(|m| m <= available_memory))
        .min_by(|a, b| {
            b.quality_score
                .total_cmp(&a.quality_score)
                .then_with(|| a.estimated_memory_bytes.cmp(&b.estimated_memory_bytes))
                .then_with(|| a.source_file.path.cmp(&b.source_file.path))
        })
}

/// Fallback when sizes are unknown: the first candidate whose level appears
/// in `preference`, else the lowest-quality candidate. Either way only
/// candidates meeting `minimum_quality` are considered.
pub fn select_by_preference<'a>(
    candidates: &'a [QuantizationInfo],
    preference: &[&str],
    minimum_quality: f64,
) -> Option<&'a QuantizationInfo> {
    let eligible = || {
        candidates
            .iter()
            .filter(move |c| c.quality_score >= minimum_quality)
    };
    preference
        .iter()
        .filter_map(|name| name.parse::<QuantizationLevel>().ok())
        .find_map(|level| eligible().find(|c| c.level == level))
        .or_else(|| eligible().min_by(|a, b| a.quality_score.total_cmp(&b.quality_score)))
}
