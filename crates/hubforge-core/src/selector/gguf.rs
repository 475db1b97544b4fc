use super::{CandidateSet, FileSelector};
use crate::backend::{is_companion_file, Backend};
use crate::hub::RepositoryFile;

/// Selects every `.gguf` weight file plus companion metadata.
///
/// Multi-quantization repositories are narrowed later by the quantization
/// analyzer. Vision projectors (`mmproj*`) are companions: when several are
/// shipped only the smallest one is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct GgufSelector;

pub(crate) fn is_projector(file: &RepositoryFile) -> bool {
    file.file_name().to_lowercase().contains("mmproj")
}

impl FileSelector for GgufSelector {
    fn select(&self, files: &[RepositoryFile]) -> CandidateSet {
        let (projectors, weights): (Vec<&RepositoryFile>, Vec<&RepositoryFile>) = files
            .iter()
            .filter(|f| Backend::Gguf.matches_weights(&f.path))
            .partition(|f| is_projector(f));
        if weights.is_empty() {
            return CandidateSet::default();
        }

        // Known sizes sort before unknown ones; path breaks ties.
        let projector = projectors
            .into_iter()
            .min_by(|a, b| {
                let key = |f: &RepositoryFile| (f.size.is_none(), f.size.unwrap_or(0));
                key(a).cmp(&key(b)).then_with(|| a.path.cmp(&b.path))
            })
            .cloned();

        let mut selected: Vec<RepositoryFile> = weights.into_iter().cloned().collect();
        selected.extend(projector);
        selected.extend(files.iter().filter(|f| is_companion_file(&f.path)).cloned());
        CandidateSet::new(selected)
    }
}
