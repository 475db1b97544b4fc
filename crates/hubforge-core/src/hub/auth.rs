//! Hugging Face access token resolution.

use std::path::Path;

/// Environment variables checked for a token, in order.
const TOKEN_ENV_VARS: &[&str] = &["HF_TOKEN", "HUGGING_FACE_HUB_TOKEN"];

fn read_token_file(path: &Path) -> Option<String> {
    let token = std::fs::read_to_string(path).ok()?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Resolve an access token.
///
/// Checks in order:
/// 1. `HF_TOKEN` environment variable
/// 2. `HUGGING_FACE_HUB_TOKEN` environment variable
/// 3. Hugging Face CLI cache (`~/.cache/huggingface/token`)
///
/// Returns the token and a label identifying its source.
pub fn resolve_token() -> Option<(String, &'static str)> {
    for var in TOKEN_ENV_VARS {
        if let Ok(token) = std::env::var(var) {
            let token = token.trim();
            if !token.is_empty() {
                return Some((token.to_string(), *var));
            }
        }
    }

    let home = dirs::home_dir()?;
    read_token_file(&home.join(".cache").join("huggingface").join("token"))
        .map(|token| (token, "hf_cache"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_token_file_trims() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("token");
        std::fs::write(&path, "  hf_abc123\n").unwrap();
        assert_eq!(read_token_file(&path), Some("hf_abc123".to_string()));
    }

    #[test]
    fn test_read_token_file_empty_or_missing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("token");
        assert_eq!(read_token_file(&path), None);

        std::fs::write(&path, "\n").unwrap();
        assert_eq!(read_token_file(&path), None);
    }
}
