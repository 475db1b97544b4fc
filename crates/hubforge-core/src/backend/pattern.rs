//! Glob-style file patterns.
//!
//! A pattern without `/` is matched against the last path segment only, so
//! `config.json` matches `config.json` and `text_encoder/config.json`. A
//! pattern containing `/` is matched against the whole path: `*` stays
//! inside one segment, `**` crosses segments and a leading `**/` also
//! matches zero directories. Matching is case-insensitive.

use regex::Regex;

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct FilePattern {
    glob: String,
    regex: Regex,
    name_only: bool,
}

impl FilePattern {
    /// Compile a glob.
    ///
    /// Every literal character is escaped before translation, so the
    /// resulting regex is always valid.
    pub fn new(glob: &str) -> Self {
        let name_only = !glob.contains('/');
        let translated = translate(glob);
        let regex = Regex::new(&translated).expect("escaped glob is a valid regex");
        Self {
            glob: glob.to_string(),
            regex,
            name_only,
        }
    }

    /// The source glob.
    pub fn as_str(&self) -> &str {
        &self.glob
    }

    /// Test a repository-relative path.
    pub fn matches(&self, path: &str) -> bool {
        let target = if self.name_only {
            path.rsplit('/').next().unwrap_or(path)
        } else {
            path
        };
        self.regex.is_match(target)
    }
}

fn translate(glob: &str) -> String {
    let mut out = String::from("(?i)^");
    let mut rest = glob;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("**/") {
            out.push_str("(?:.*/)?");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("**") {
            out.push_str(".*");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('*') {
            out.push_str("[^/]*");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('?') {
            out.push_str("[^/]");
            rest = tail;
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4])));
            }
            rest = chars.as_str();
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_only_matches_any_depth() {
        let p = FilePattern::new("config.json");
        assert!(p.matches("config.json"));
        assert!(p.matches("text_encoder/config.json"));
        assert!(!p.matches("config.json.bak"));
    }

    #[test]
    fn test_case_insensitive() {
        let p = FilePattern::new("*.gguf");
        assert!(p.matches("Llama-3-8B.Q4_K_M.GGUF"));
        assert!(p.matches("sub/dir/model.gguf"));
        assert!(!p.matches("model.gguf.part"));
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        let p = FilePattern::new("weights/*.bin");
        assert!(p.matches("weights/a.bin"));
        assert!(!p.matches("weights/nested/a.bin"));
        assert!(!p.matches("other/weights/a.bin"));
    }

    #[test]
    fn test_double_star_crosses_segments() {
        let p = FilePattern::new("**/*.mlmodelc/**");
        assert!(p.matches("Unet.mlmodelc/weights/weight.bin"));
        assert!(p.matches("split_einsum/compiled/Unet.mlmodelc/model.mil"));
        assert!(!p.matches("Unet.mlmodelc"));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let p = FilePattern::new("model.safetensors.index.json");
        assert!(p.matches("model.safetensors.index.json"));
        assert!(!p.matches("modelXsafetensorsXindexXjson"));
        let q = FilePattern::new("file(1)+?.txt");
        assert!(q.matches("file(1)+a.txt"));
    }

    #[test]
    fn test_as_str() {
        assert_eq!(FilePattern::new("*.zip").as_str(), "*.zip");
    }
}
