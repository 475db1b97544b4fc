use super::{CandidateSet, FileSelector};
use crate::backend::{is_companion_file, Backend};
use crate::hub::RepositoryFile;

/// Selects safetensors weights and their config/tokenizer companions.
///
/// Mistral-style repositories ship `consolidated.safetensors` next to the
/// regular `model*.safetensors` shards. Both hold the same weights, so the
/// consolidated copy is dropped whenever regular weights exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetensorsSelector;

fn is_consolidated(file: &RepositoryFile) -> bool {
    file.file_name().to_lowercase().starts_with("consolidated")
}

impl FileSelector for SafetensorsSelector {
    fn select(&self, files: &[RepositoryFile]) -> CandidateSet {
        let weights: Vec<&RepositoryFile> = files
            .iter()
            .filter(|f| Backend::Mlx.matches_weights(&f.path))
            .collect();
        let has_regular = weights.iter().any(|f| !is_consolidated(f));

        let mut selected: Vec<RepositoryFile> = weights
            .into_iter()
            .filter(|f| !(has_regular && is_consolidated(f)))
            .cloned()
            .collect();
        if selected.is_empty() {
            return CandidateSet::default();
        }
        selected.extend(
            files
                .iter()
                .filter(|f| is_companion_file(&f.path) && !(has_regular && is_consolidated(f)))
                .cloned(),
        );
        CandidateSet::new(selected)
    }
}
