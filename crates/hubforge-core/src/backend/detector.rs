//! Backend detection over a repository listing.

use super::Backend;
use crate::hub::RepositoryFile;
use tracing::debug;

/// Classifies repository listings into the backends they can serve.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendDetector;

impl BackendDetector {
    /// Create a detector.
    pub fn new() -> Self {
        Self
    }

    /// Backends supported by `files`, sorted and deduplicated.
    ///
    /// A backend is reported only when every one of its required pattern
    /// groups is matched by at least one file.
    pub fn detect(&self, files: &[RepositoryFile]) -> Vec<Backend> {
        let detected: Vec<Backend> = Backend::ALL
            .into_iter()
            .filter(|backend| self.supports(files, *backend))
            .collect();
        debug!(
            file_count = files.len(),
            backends = ?detected,
            "Detected backends"
        );
        detected
    }

    /// Backends whose required patterns `file` participates in.
    ///
    /// This answers "could this file be part of a backend", not "is the
    /// backend complete": `config.json` alone reports [`Backend::Mlx`].
    pub fn analyze(&self, file: &RepositoryFile) -> Vec<Backend> {
        Backend::ALL
            .into_iter()
            .filter(|backend| {
                backend
                    .required_patterns()
                    .iter()
                    .flatten()
                    .any(|p| p.matches(&file.path))
            })
            .collect()
    }

    /// Whether `files` satisfy every required group of `backend`.
    pub fn supports(&self, files: &[RepositoryFile], backend: Backend) -> bool {
        let groups = backend.required_patterns();
        !groups.is_empty()
            && groups
                .iter()
                .all(|group| files.iter().any(|f| group.iter().any(|p| p.matches(&f.path))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(paths: &[&str]) -> Vec<RepositoryFile> {
        paths
            .iter()
            .map(|p| RepositoryFile::new(*p, Some(1024)))
            .collect()
    }

    #[test]
    fn test_weights_without_config_is_not_mlx() {
        let detector = BackendDetector::new();
        let mut listing = files(&["model.safetensors", "README.md"]);
        assert!(detector.detect(&listing).is_empty());

        listing.push(RepositoryFile::new("config.json", Some(512)));
        assert_eq!(detector.detect(&listing), vec![Backend::Mlx]);
    }

    #[test]
    fn test_gguf_single_file() {
        let detector = BackendDetector::new();
        let listing = files(&["llama-3-8b.Q4_K_M.gguf"]);
        assert_eq!(detector.detect(&listing), vec![Backend::Gguf]);
    }

    #[test]
    fn test_case_insensitive_matching() {
        let detector = BackendDetector::new();
        let listing = files(&["MODEL.SAFETENSORS", "Config.JSON", "weights.GGUF"]);
        assert_eq!(detector.detect(&listing), vec![Backend::Gguf, Backend::Mlx]);
    }

    #[test]
    fn test_coreml_structures() {
        let detector = BackendDetector::new();
        let compiled = files(&["original/compiled/Unet.mlmodelc/weights/weight.bin"]);
        assert_eq!(detector.detect(&compiled), vec![Backend::CoreMl]);

        let archived = files(&["coreml-stable-diffusion-v1-5_split_einsum_compiled.zip"]);
        assert_eq!(detector.detect(&archived), vec![Backend::CoreMl]);

        let plain_zip = files(&["assets.zip"]);
        assert!(detector.detect(&plain_zip).is_empty());
    }

    #[test]
    fn test_results_sorted_and_deduplicated() {
        let detector = BackendDetector::new();
        let listing = files(&[
            "b.gguf",
            "a.gguf",
            "config.json",
            "model-00001-of-00002.safetensors",
            "model-00002-of-00002.safetensors",
            "Unet.mlpackage/Data/model.mlmodel",
        ]);
        let detected = detector.detect(&listing);
        assert_eq!(detected, vec![Backend::CoreMl, Backend::Gguf, Backend::Mlx]);

        let mut reversed = listing.clone();
        reversed.reverse();
        assert_eq!(detector.detect(&reversed), detected);
    }

    #[test]
    fn test_remote_never_detected() {
        let detector = BackendDetector::new();
        let listing = files(&["model.gguf", "config.json", "model.safetensors"]);
        assert!(!detector.detect(&listing).contains(&Backend::Remote));
        assert!(!detector.supports(&listing, Backend::Remote));
    }

    #[test]
    fn test_analyze_single_file() {
        let detector = BackendDetector::new();
        assert_eq!(
            detector.analyze(&RepositoryFile::new("x.gguf", None)),
            vec![Backend::Gguf]
        );
        assert_eq!(
            detector.analyze(&RepositoryFile::new("config.json", None)),
            vec![Backend::Mlx]
        );
        assert!(detector
            .analyze(&RepositoryFile::new("README.md", None))
            .is_empty());
    }
}
