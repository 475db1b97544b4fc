use super::{CandidateSet, FileSelector};
use crate::backend::Backend;
use crate::config::SelectionConfig;
use crate::hub::RepositoryFile;
use crate::storage::ArchiveKind;
use std::collections::BTreeSet;
use tracing::debug;

/// Variant-aware selector for packaged (Core ML) repositories.
///
/// Packaged repositories often ship the same model several times: one tree
/// per attention implementation (`split_einsum/`, `original/`), each split
/// again into `compiled/` and `packages/`, plus root-level archives of each
/// combination. Downloading all of them multiplies the size by 2-4x for no
/// benefit, so exactly one variant is chosen by fixed priority:
///
/// 1. top-level variant: `split_einsum` before `original`
/// 2. within it: `compiled` before `packages`
/// 3. within that: the archive form before the loose directory form
///
/// Variant names match with `-` and `_` treated alike. Root-level metadata
/// shared by every variant is always included. Packaged content outside any
/// variant tree is included only when no variant was found, or when it sits
/// at the root.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackagedSelector;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Role {
    Variant {
        variant: &'static str,
        sub: Option<&'static str>,
        archive: bool,
    },
    Content,
    Shared,
    Ignored,
}

/// Lowercase with `-` folded to `_`, so `split-einsum` and `Split_Einsum` agree.
fn normalize(text: &str) -> String {
    text.to_lowercase().replace('-', "_")
}

fn find_marker(text: &str, markers: &'static [&'static str]) -> Option<&'static str> {
    let normalized = normalize(text);
    markers.iter().copied().find(|m| normalized.contains(m))
}

fn exact_marker(segment: &str, markers: &'static [&'static str]) -> Option<&'static str> {
    let normalized = normalize(segment);
    markers.iter().copied().find(|m| normalized == *m)
}

/// Packaged content that sits at the root, either loose or as a root-level
/// `.mlmodelc`/`.mlpackage` bundle, rather than inside some other tree.
fn is_root_content(file: &RepositoryFile) -> bool {
    match file.top_level_dir() {
        None => true,
        Some(top) => {
            let top = top.to_lowercase();
            top.ends_with(".mlmodelc") || top.ends_with(".mlpackage")
        }
    }
}

fn classify(file: &RepositoryFile) -> Role {
    let archive = ArchiveKind::from_path(&file.path).is_some();

    if let Some(top) = file.top_level_dir() {
        if let Some(variant) = exact_marker(top, SelectionConfig::VARIANT_PRIORITY) {
            let segments: Vec<&str> = file.path.split('/').collect();
            let sub = if segments.len() > 2 {
                exact_marker(segments[1], SelectionConfig::SUBVARIANT_PRIORITY)
            } else {
                None
            };
            return Role::Variant {
                variant,
                sub,
                archive,
            };
        }
    } else if archive {
        if let Some(variant) = find_marker(file.file_name(), SelectionConfig::VARIANT_PRIORITY) {
            return Role::Variant {
                variant,
                sub: find_marker(file.file_name(), SelectionConfig::SUBVARIANT_PRIORITY),
                archive,
            };
        }
    }

    if Backend::CoreMl.matches_weights(&file.path) {
        Role::Content
    } else if file.is_root_level()
        && !archive
        && Backend::CoreMl
            .optional_patterns()
            .iter()
            .any(|p| p.matches(&file.path))
    {
        Role::Shared
    } else {
        Role::Ignored
    }
}

fn by_priority(present: &BTreeSet<&'static str>, priority: &[&'static str]) -> Option<&'static str> {
    priority.iter().copied().find(|m| present.contains(m))
}

impl FileSelector for PackagedSelector {
    fn select(&self, files: &[RepositoryFile]) -> CandidateSet {
        let classified: Vec<(&RepositoryFile, Role)> =
            files.iter().map(|f| (f, classify(f))).collect();

        let variants: BTreeSet<&'static str> = classified
            .iter()
            .filter_map(|(_, role)| match role {
                Role::Variant { variant, .. } => Some(*variant),
                _ => None,
            })
            .collect();
        let chosen_variant = by_priority(&variants, SelectionConfig::VARIANT_PRIORITY);

        let in_variant = |role: &Role| {
            matches!(role, Role::Variant { variant, .. } if Some(*variant) == chosen_variant)
        };
        let subs: BTreeSet<&'static str> = classified
            .iter()
            .filter(|(_, role)| in_variant(role))
            .filter_map(|(_, role)| match role {
                Role::Variant { sub, .. } => *sub,
                _ => None,
            })
            .collect();
        let chosen_sub = by_priority(&subs, SelectionConfig::SUBVARIANT_PRIORITY);

        let in_sub = |role: &Role| {
            in_variant(role)
                && matches!(role, Role::Variant { sub, .. } if sub.is_none() || *sub == chosen_sub)
        };
        let has_archive = classified
            .iter()
            .any(|(_, role)| in_sub(role) && matches!(role, Role::Variant { archive: true, .. }));

        let selected: Vec<&(&RepositoryFile, Role)> = classified
            .iter()
            .filter(|(file, role)| match role {
                Role::Variant { archive, sub, .. } => {
                    in_sub(role) && (sub.is_none() || *archive == has_archive)
                }
                // Once a variant is chosen, other packaged trees are alternates of it
                Role::Content => chosen_variant.is_none() || is_root_content(file),
                Role::Shared => true,
                Role::Ignored => false,
            })
            .collect();

        let has_payload = selected
            .iter()
            .any(|(_, role)| matches!(role, Role::Content | Role::Variant { .. }));
        if !has_payload {
            return CandidateSet::default();
        }

        debug!(
            variant = ?chosen_variant,
            sub_variant = ?chosen_sub,
            archive = has_archive,
            selected = selected.len(),
            total = files.len(),
            "Selected packaged variant"
        );
        CandidateSet::new(selected.into_iter().map(|(f, _)| (*f).clone()).collect())
    }
}
