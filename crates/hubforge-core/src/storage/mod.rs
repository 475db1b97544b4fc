//! On-disk model store.
//!
//! Layout:
//!
//! ```text
//! {root}/
//!   {backend}/{sanitized repo id}/      finalized models + model_record.json
//!   .staging/{backend}/{sanitized}/     in-flight downloads
//! ```
//!
//! A model directory only ever appears through a rename of a complete
//! staging directory, and only disappears through a rename to a trash name,
//! so "the directory exists" and "the model is complete" are the same fact.
//!
//! - [`naming`] - Repository id sanitization
//! - [`extract`] - Archive extraction for packaged backends
//! - [`space`] - Free disk space probes

mod extract;
mod naming;
mod space;

pub use extract::{extract_archive, extract_archives_in, ArchiveKind};
pub use naming::{sanitize_repo_id, unsanitize_repo_id};
pub use space::{FixedSpaceProbe, Fs2SpaceProbe, SpaceProbe};

use crate::backend::Backend;
use crate::config::{NetworkConfig, StorageConfig};
use crate::error::{HubError, Result};
use crate::identity::ModelIdentity;
use crate::metadata::{atomic_read_json, atomic_write_json, keys, ModelRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Owns the model store under one root directory.
pub struct ModelFileManager {
    root: PathBuf,
    identity: ModelIdentity,
    space: Arc<dyn SpaceProbe>,
}

impl std::fmt::Debug for ModelFileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelFileManager")
            .field("root", &self.root)
            .finish()
    }
}

impl ModelFileManager {
    /// Open (and create if needed) a store rooted at `root`.
    ///
    /// Leftovers of interrupted swaps or deletions are removed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| HubError::io_with_path(e, &root))?;
        let manager = Self {
            root,
            identity: ModelIdentity::new(),
            space: Arc::new(Fs2SpaceProbe),
        };
        manager.remove_trash();
        Ok(manager)
    }

    /// Replace the free-space probe.
    pub fn with_space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space = probe;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final location of a model.
    pub fn model_dir(&self, repo_id: &str, backend: Backend) -> PathBuf {
        self.root
            .join(backend.as_str())
            .join(sanitize_repo_id(repo_id))
    }

    /// Staging location of a model. Not created.
    pub fn staging_dir(&self, repo_id: &str, backend: Backend) -> PathBuf {
        self.root
            .join(StorageConfig::STAGING_DIR_NAME)
            .join(backend.as_str())
            .join(sanitize_repo_id(repo_id))
    }

    /// Create the staging directory for a download and return it.
    ///
    /// Existing content is kept so an earlier failed attempt can resume.
    pub fn create_staging_dir(&self, repo_id: &str, backend: Backend) -> Result<PathBuf> {
        let dir = self.staging_dir(repo_id, backend);
        fs::create_dir_all(&dir).map_err(|e| HubError::io_with_path(e, &dir))?;
        Ok(dir)
    }

    /// Remove a staging directory, if present.
    pub fn remove_staging_dir(&self, repo_id: &str, backend: Backend) -> Result<()> {
        let dir = self.staging_dir(repo_id, backend);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!("Removed staging directory {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HubError::io_with_path(e, dir)),
        }
    }

    /// Move a complete staging directory into the store.
    ///
    /// Archives are extracted and deleted first (archive-based backends),
    /// the record is written inside the staging directory, and only then
    /// is the directory renamed onto its final path. A previous copy of the
    /// model is moved aside before the swap and removed after it.
    pub fn finalize_download(
        &self,
        repo_id: &str,
        name: &str,
        backend: Backend,
        staging: &Path,
        total_size: u64,
        metadata: BTreeMap<String, String>,
    ) -> Result<ModelRecord> {
        remove_partial_files(staging)?;
        if backend.is_archive_based() {
            let extracted = extract_archives_in(staging)?;
            debug!(repo_id, extracted, "Extracted archives");
        }

        let record = ModelRecord {
            id: self.identity.generate_id(repo_id),
            name: name.to_string(),
            backend,
            storage_path: self.model_dir(repo_id, backend),
            total_size_bytes: total_size,
            finalized_at: Utc::now(),
            metadata,
        };
        atomic_write_json(&staging.join(StorageConfig::METADATA_FILENAME), &record)?;

        let final_dir = &record.storage_path;
        if let Some(parent) = final_dir.parent() {
            fs::create_dir_all(parent).map_err(|e| HubError::io_with_path(e, parent))?;
        }

        let displaced = if final_dir.exists() {
            let trash = self.trash_path(final_dir);
            fs::rename(final_dir, &trash).map_err(|e| HubError::io_with_path(e, final_dir))?;
            Some(trash)
        } else {
            None
        };

        if let Err(e) = fs::rename(staging, final_dir) {
            if let Some(trash) = &displaced {
                let _ = fs::rename(trash, final_dir);
            }
            return Err(HubError::io_with_path(e, final_dir));
        }
        if let Some(trash) = displaced {
            if let Err(e) = fs::remove_dir_all(&trash) {
                warn!("Failed to remove replaced model at {}: {}", trash.display(), e);
            }
        }

        info!(
            repo_id,
            backend = %backend,
            path = %final_dir.display(),
            "Finalized model"
        );
        Ok(record)
    }

    /// Every model in the store.
    ///
    /// A model directory whose record is missing or unreadable gets a
    /// record rebuilt from disk (size summed from its files, id derived
    /// from the directory name), which is written back.
    pub fn list_downloaded_models(&self) -> Result<Vec<ModelRecord>> {
        let mut records = Vec::new();
        for backend in Backend::ALL {
            let backend_dir = self.root.join(backend.as_str());
            let entries = match fs::read_dir(&backend_dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(HubError::io_with_path(e, backend_dir)),
            };

            for entry in entries {
                let entry = entry.map_err(|e| HubError::io_with_path(e, &backend_dir))?;
                let path = entry.path();
                let dir_name = entry.file_name().to_string_lossy().into_owned();
                if dir_name.starts_with('.') || !path.is_dir() {
                    continue;
                }
                if let Some(record) = self.load_or_recover(&path, &dir_name, backend) {
                    records.push(record);
                }
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name).then(a.backend.cmp(&b.backend)));
        Ok(records)
    }

    fn load_or_recover(&self, dir: &Path, dir_name: &str, backend: Backend) -> Option<ModelRecord> {
        let record_path = dir.join(StorageConfig::METADATA_FILENAME);
        match atomic_read_json::<ModelRecord>(&record_path) {
            Ok(Some(mut record)) => {
                record.storage_path = dir.to_path_buf();
                return Some(record);
            }
            Ok(None) => debug!("No record in {}", dir.display()),
            Err(e) => warn!("Unreadable record in {}: {}", dir.display(), e),
        }

        let (total_size, file_count, modified) = scan_dir(dir);
        if file_count == 0 {
            return None;
        }

        let repo_id = unsanitize_repo_id(dir_name);
        let record = ModelRecord {
            id: self.identity.generate_id(&repo_id),
            name: repo_id,
            backend,
            storage_path: dir.to_path_buf(),
            total_size_bytes: total_size,
            finalized_at: modified.unwrap_or_else(Utc::now),
            metadata: BTreeMap::from([
                (keys::RECOVERED.to_string(), "true".to_string()),
                (keys::FILE_COUNT.to_string(), file_count.to_string()),
            ]),
        };
        warn!(
            repo_id = %record.name,
            backend = %backend,
            "Recovered model record from disk"
        );
        if let Err(e) = atomic_write_json(&record_path, &record) {
            warn!("Failed to write recovered record for {}: {}", dir.display(), e);
        }
        Some(record)
    }

    /// Whether `repo_id` is finalized for any backend.
    pub fn model_exists(&self, repo_id: &str) -> bool {
        Backend::ALL
            .into_iter()
            .any(|backend| self.model_exists_for(repo_id, backend))
    }

    /// Whether `repo_id` is finalized for `backend`.
    pub fn model_exists_for(&self, repo_id: &str, backend: Backend) -> bool {
        self.model_dir(repo_id, backend).is_dir()
    }

    /// Delete `repo_id` for every backend. Returns whether anything was removed.
    pub fn delete_model(&self, repo_id: &str) -> Result<bool> {
        let mut deleted = false;
        for backend in Backend::ALL {
            deleted |= self.delete_model_for(repo_id, backend)?;
        }
        Ok(deleted)
    }

    /// Delete `repo_id` for `backend`. Returns whether it existed.
    pub fn delete_model_for(&self, repo_id: &str, backend: Backend) -> Result<bool> {
        let dir = self.model_dir(repo_id, backend);
        if !dir.is_dir() {
            return Ok(false);
        }
        let trash = self.trash_path(&dir);
        fs::rename(&dir, &trash).map_err(|e| HubError::io_with_path(e, &dir))?;
        fs::remove_dir_all(&trash).map_err(|e| HubError::io_with_path(e, &trash))?;
        info!(repo_id, backend = %backend, "Deleted model");
        Ok(true)
    }

    /// Free bytes on the store's filesystem.
    pub fn available_space(&self) -> Result<u64> {
        self.space.available_space(&self.root)
    }

    /// Bytes needed to download and finalize `candidate_size` bytes.
    pub fn required_space(candidate_size: u64, backend: Backend, multiplier: Option<f64>) -> u64 {
        let multiplier = multiplier.unwrap_or_else(|| backend.disk_space_multiplier());
        (candidate_size as f64 * multiplier).ceil() as u64
    }

    /// Fail with [`HubError::InsufficientSpace`] if the candidate set does not fit.
    pub fn validate_space(
        &self,
        repo_id: &str,
        backend: Backend,
        candidate_size: u64,
        multiplier: Option<f64>,
    ) -> Result<()> {
        let required_bytes = Self::required_space(candidate_size, backend, multiplier);
        let available_bytes = self.available_space()?;
        if required_bytes > available_bytes {
            return Err(HubError::InsufficientSpace {
                repo_id: repo_id.to_string(),
                backend,
                required_bytes,
                available_bytes,
            });
        }
        debug!(repo_id, required_bytes, available_bytes, "Disk space check passed");
        Ok(())
    }

    fn trash_path(&self, dir: &Path) -> PathBuf {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        dir.with_file_name(format!(
            "{}{}-{}",
            StorageConfig::TRASH_PREFIX,
            name,
            Uuid::new_v4().simple()
        ))
    }

    fn remove_trash(&self) {
        for backend in Backend::ALL {
            let Ok(entries) = fs::read_dir(self.root.join(backend.as_str())) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with(StorageConfig::TRASH_PREFIX) {
                    debug!("Removing leftover {}", entry.path().display());
                    let _ = fs::remove_dir_all(entry.path());
                }
            }
        }
    }
}

/// Total size, file count and newest modification time of the files under
/// `dir`, excluding the record itself.
fn scan_dir(dir: &Path) -> (u64, usize, Option<DateTime<Utc>>) {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name() != StorageConfig::METADATA_FILENAME)
        .filter_map(|e| e.metadata().ok())
        .fold((0, 0, None), |(size, count, newest), meta| {
            let modified = meta.modified().ok().map(DateTime::<Utc>::from);
            (size + meta.len(), count + 1, newest.max(modified))
        })
}

fn remove_partial_files(dir: &Path) -> Result<()> {
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        let is_partial = entry.file_type().is_file()
            && entry
                .file_name()
                .to_string_lossy()
                .ends_with(NetworkConfig::DOWNLOAD_TEMP_SUFFIX);
        if is_partial {
            fs::remove_file(entry.path()).map_err(|e| HubError::io_with_path(e, entry.path()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ModelFileManager) {
        let temp_dir = TempDir::new().unwrap();
        let manager = ModelFileManager::new(temp_dir.path().join("models")).unwrap();
        (temp_dir, manager)
    }

    fn stage(manager: &ModelFileManager, repo_id: &str, backend: Backend, files: &[(&str, &str)]) -> PathBuf {
        let staging = manager.create_staging_dir(repo_id, backend).unwrap();
        for (path, content) in files {
            let target = staging.join(path);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(target, content).unwrap();
        }
        staging
    }

    #[test]
    fn test_layout() {
        let (_tmp, manager) = setup();
        let dir = manager.model_dir("org/model", Backend::Gguf);
        assert!(dir.ends_with("gguf/org--model"));
        let staging = manager.staging_dir("org/model", Backend::Gguf);
        assert!(staging.ends_with(".staging/gguf/org--model"));
        assert_ne!(dir, staging);
        assert_ne!(
            manager.staging_dir("org/a", Backend::Gguf),
            manager.staging_dir("org/b", Backend::Gguf)
        );
    }

    #[test]
    fn test_finalize_moves_staging_and_writes_record() {
        let (_tmp, manager) = setup();
        let staging = stage(
            &manager,
            "org/model",
            Backend::Gguf,
            &[("model.Q4_K_M.gguf", "weights"), ("stale.gguf.part", "x")],
        );
        assert!(!manager.model_exists("org/model"));

        let record = manager
            .finalize_download("org/model", "org/model", Backend::Gguf, &staging, 7, BTreeMap::new())
            .unwrap();

        assert!(!staging.exists());
        assert!(manager.model_exists("org/model"));
        assert!(manager.model_exists_for("org/model", Backend::Gguf));
        assert!(!manager.model_exists_for("org/model", Backend::Mlx));
        assert_eq!(record.id, ModelIdentity::new().generate_id("org/model"));
        assert!(record.storage_path.join("model.Q4_K_M.gguf").exists());
        assert!(!record.storage_path.join("stale.gguf.part").exists());
        assert!(record
            .storage_path
            .join(StorageConfig::METADATA_FILENAME)
            .exists());
    }

    #[test]
    fn test_finalize_replaces_existing_model() {
        let (_tmp, manager) = setup();
        let first = stage(&manager, "org/model", Backend::Mlx, &[("old.safetensors", "old")]);
        manager
            .finalize_download("org/model", "org/model", Backend::Mlx, &first, 3, BTreeMap::new())
            .unwrap();

        let second = stage(&manager, "org/model", Backend::Mlx, &[("new.safetensors", "new")]);
        let record = manager
            .finalize_download("org/model", "org/model", Backend::Mlx, &second, 3, BTreeMap::new())
            .unwrap();

        assert!(record.storage_path.join("new.safetensors").exists());
        assert!(!record.storage_path.join("old.safetensors").exists());
        let leftovers: Vec<_> = fs::read_dir(manager.root().join("mlx"))
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_list_reads_records() {
        let (_tmp, manager) = setup();
        let staging = stage(&manager, "b/two", Backend::Gguf, &[("x.gguf", "1")]);
        manager
            .finalize_download("b/two", "b/two", Backend::Gguf, &staging, 1, BTreeMap::new())
            .unwrap();
        let staging = stage(&manager, "a/one", Backend::Mlx, &[("x.safetensors", "1")]);
        manager
            .finalize_download("a/one", "a/one", Backend::Mlx, &staging, 1, BTreeMap::new())
            .unwrap();
        // In-flight staging content is not a model
        stage(&manager, "c/three", Backend::Gguf, &[("y.gguf", "1")]);

        let records = manager.list_downloaded_models().unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a/one", "b/two"]);
        assert!(records.iter().all(|r| r.storage_path.is_dir()));
    }

    #[test]
    fn test_list_recovers_missing_record() {
        let (_tmp, manager) = setup();
        let dir = manager.model_dir("org/orphan", Backend::Gguf);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.gguf"), vec![0u8; 100]).unwrap();
        fs::write(dir.join("b.gguf"), vec![0u8; 50]).unwrap();

        let records = manager.list_downloaded_models().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.name, "org/orphan");
        assert_eq!(record.total_size_bytes, 150);
        assert_eq!(record.id, ModelIdentity::new().generate_id("org/orphan"));
        assert_eq!(record.metadata.get(keys::RECOVERED).map(String::as_str), Some("true"));

        // Written back, so the next listing reads it instead of rebuilding
        assert!(dir.join(StorageConfig::METADATA_FILENAME).exists());
        let again = manager.list_downloaded_models().unwrap();
        assert_eq!(again[0].total_size_bytes, 150);
    }

    #[test]
    fn test_list_recovers_corrupt_record() {
        let (_tmp, manager) = setup();
        let dir = manager.model_dir("org/corrupt", Backend::Mlx);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("model.safetensors"), vec![0u8; 10]).unwrap();
        fs::write(dir.join(StorageConfig::METADATA_FILENAME), "{ truncated").unwrap();

        let records = manager.list_downloaded_models().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].total_size_bytes, 10);
    }

    #[test]
    fn test_delete_model() {
        let (_tmp, manager) = setup();
        let staging = stage(&manager, "org/model", Backend::Gguf, &[("x.gguf", "1")]);
        manager
            .finalize_download("org/model", "org/model", Backend::Gguf, &staging, 1, BTreeMap::new())
            .unwrap();

        assert!(manager.delete_model("org/model").unwrap());
        assert!(!manager.model_exists("org/model"));
        assert!(!manager.delete_model("org/model").unwrap());
        assert!(manager.list_downloaded_models().unwrap().is_empty());
    }

    #[test]
    fn test_leftover_trash_removed_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("models");
        let trash = root.join("gguf").join(".trash-org--model-123");
        fs::create_dir_all(&trash).unwrap();

        ModelFileManager::new(&root).unwrap();
        assert!(!trash.exists());
    }

    #[test]
    fn test_space_validation() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ModelFileManager::new(temp_dir.path())
            .unwrap()
            .with_space_probe(Arc::new(FixedSpaceProbe(1_000)));

        assert!(manager.validate_space("a/b", Backend::Gguf, 900, None).is_ok());
        match manager.validate_space("a/b", Backend::CoreMl, 900, None) {
            Err(HubError::InsufficientSpace {
                required_bytes,
                available_bytes,
                ..
            }) => {
                assert_eq!(required_bytes, 1_800);
                assert_eq!(available_bytes, 1_000);
            }
            other => panic!("expected insufficient space, got {:?}", other),
        }
        assert!(manager.validate_space("a/b", Backend::CoreMl, 900, Some(1.0)).is_ok());
    }
}
