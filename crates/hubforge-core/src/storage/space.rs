//! Free disk space queries.

use crate::error::{HubError, Result};
use std::path::Path;

/// Source of free-space figures for a filesystem path.
pub trait SpaceProbe: Send + Sync {
    /// Bytes available to the current user on the filesystem holding `path`.
    fn available_space(&self, path: &Path) -> Result<u64>;
}

/// Queries the filesystem through `fs2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fs2SpaceProbe;

impl SpaceProbe for Fs2SpaceProbe {
    fn available_space(&self, path: &Path) -> Result<u64> {
        // The store root may not exist yet; measure its nearest ancestor
        let existing = path
            .ancestors()
            .find(|p| p.exists())
            .unwrap_or_else(|| Path::new("."));
        fs2::available_space(existing).map_err(|e| HubError::io_with_path(e, existing))
    }
}

/// Reports a fixed amount of free space.
#[derive(Debug, Clone, Copy)]
pub struct FixedSpaceProbe(pub u64);

impl SpaceProbe for FixedSpaceProbe {
    fn available_space(&self, _path: &Path) -> Result<u64> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fs2_probe_on_missing_child() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("not").join("yet");
        let space = Fs2SpaceProbe.available_space(&missing).unwrap();
        assert!(space > 0);
    }

    #[test]
    fn test_fixed_probe() {
        assert_eq!(FixedSpaceProbe(7).available_space(Path::new("/")).unwrap(), 7);
    }
}
