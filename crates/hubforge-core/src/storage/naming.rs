//! Filesystem-safe directory names for repository ids.
//!
//! `org/model` becomes `org--model`. Any other character outside
//! `[A-Za-z0-9._-]` becomes `_`, and a leading `.` becomes `_` so a model
//! directory is never mistaken for an internal dot directory.

use regex::Regex;
use std::sync::LazyLock;

/// Replaces the repository path separator.
const SEPARATOR: &str = "--";

/// Regex for characters that are not safe in a directory name.
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("static regex is valid"));

/// Map a repository id to a directory name.
///
/// # Examples
///
/// ```
/// use hubforge_core::storage::sanitize_repo_id;
///
/// assert_eq!(sanitize_repo_id("TheBloke/Llama-2-7B-GGUF"), "TheBloke--Llama-2-7B-GGUF");
/// assert_eq!(sanitize_repo_id("org/model name:v2"), "org--model_name_v2");
/// ```
pub fn sanitize_repo_id(repo_id: &str) -> String {
    let joined = repo_id
        .trim()
        .split('/')
        .map(|part| UNSAFE_CHARS.replace_all(part, "_").into_owned())
        .collect::<Vec<_>>()
        .join(SEPARATOR);
    match joined.strip_prefix('.') {
        Some(rest) => format!("_{}", rest),
        None if joined.is_empty() => "_".to_string(),
        None => joined,
    }
}

/// Reconstruct a repository id from a directory name.
///
/// The first `--` is read back as `/`. Characters replaced by `_` cannot be
/// recovered, which is fine for diagnostics and identity recovery of ids
/// that only contain safe characters.
pub fn unsanitize_repo_id(dir_name: &str) -> String {
    dir_name.replacen(SEPARATOR, "/", 1)
}
