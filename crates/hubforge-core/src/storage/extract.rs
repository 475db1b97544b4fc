//! Archive extraction for packaged models.
//!
//! Supported formats are `.zip`, `.tar.gz` / `.tgz` and `.tar.zst`. Zip
//! entries that would escape the destination are skipped; tar entries are
//! guarded by `tar`'s own unpack checks.

use crate::error::{HubError, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Archive formats recognized by file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
    TarZst,
}

impl ArchiveKind {
    /// Detect the archive format from a path's file name.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let name = path.as_ref().file_name()?.to_str()?.to_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.zst") {
            Some(Self::TarZst)
        } else {
            None
        }
    }
}

/// Extract `archive_path` into `dest_dir`.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let kind = ArchiveKind::from_path(archive_path).ok_or_else(|| HubError::Archive {
        path: archive_path.to_path_buf(),
        message: "unrecognized archive format".to_string(),
    })?;
    info!("Extracting {:?} archive {}", kind, archive_path.display());

    let file = File::open(archive_path).map_err(|e| HubError::io_with_path(e, archive_path))?;
    match kind {
        ArchiveKind::Zip => extract_zip(file, archive_path, dest_dir),
        ArchiveKind::TarGz => {
            let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
            unpack_tar(tar::Archive::new(decoder), archive_path, dest_dir)
        }
        ArchiveKind::TarZst => {
            let decoder = zstd::stream::Decoder::new(BufReader::new(file)).map_err(|e| {
                HubError::Archive {
                    path: archive_path.to_path_buf(),
                    message: format!("Failed to create zstd decoder: {}", e),
                }
            })?;
            unpack_tar(tar::Archive::new(decoder), archive_path, dest_dir)
        }
    }
}

fn extract_zip(file: File, archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let with_path = |e: zip::result::ZipError| match HubError::from(e) {
        HubError::Archive { message, .. } => HubError::Archive {
            path: archive_path.to_path_buf(),
            message,
        },
        other => other,
    };
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(with_path)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(with_path)?;
        let outpath = match entry.enclosed_name() {
            Some(path) => dest_dir.join(path),
            None => {
                debug!("Skipping unsafe zip entry {}", entry.name());
                continue;
            }
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath).map_err(|e| HubError::io_with_path(e, &outpath))?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HubError::io_with_path(e, parent))?;
        }
        let mut outfile =
            File::create(&outpath).map_err(|e| HubError::io_with_path(e, &outpath))?;
        std::io::copy(&mut entry, &mut outfile).map_err(|e| HubError::io_with_path(e, &outpath))?;
    }
    Ok(())
}

fn unpack_tar<R: std::io::Read>(
    mut archive: tar::Archive<R>,
    archive_path: &Path,
    dest_dir: &Path,
) -> Result<()> {
    archive.unpack(dest_dir).map_err(|e| HubError::Archive {
        path: archive_path.to_path_buf(),
        message: format!("Failed to extract tarball: {}", e),
    })
}

/// Extract every archive under `dir` in place, deleting each archive after
/// it extracted successfully. Returns the number of archives extracted.
pub fn extract_archives_in(dir: &Path) -> Result<usize> {
    let archives: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| ArchiveKind::from_path(entry.path()).is_some())
        .map(|entry| entry.into_path())
        .collect();

    for archive in &archives {
        let dest = archive.parent().unwrap_or(dir);
        extract_archive(archive, dest)?;
        std::fs::remove_file(archive).map_err(|e| HubError::io_with_path(e, archive))?;
    }
    Ok(archives.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    fn write_tar_gz(path: &Path, name: &str, data: &[u8]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_archive_kind_detection() {
        assert_eq!(ArchiveKind::from_path("a/Unet.mlmodelc.zip"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_path("x.TAR.GZ"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_path("x.tgz"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_path("x.tar.zst"), Some(ArchiveKind::TarZst));
        assert_eq!(ArchiveKind::from_path("x.gguf"), None);
    }

    #[test]
    fn test_extract_zip_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("model_compiled.zip");
        write_zip(
            &archive,
            &[
                ("Unet.mlmodelc/model.mil", &b"mil"[..]),
                ("Unet.mlmodelc/weights/weight.bin", &b"weights"[..]),
            ],
        );

        assert_eq!(extract_archives_in(temp_dir.path()).unwrap(), 1);
        assert!(!archive.exists());
        let weight = temp_dir.path().join("Unet.mlmodelc/weights/weight.bin");
        assert_eq!(std::fs::read(weight).unwrap(), b"weights");
    }

    #[test]
    fn test_zip_slip_entries_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("dest");
        std::fs::create_dir_all(&dest).unwrap();
        let archive = temp_dir.path().join("evil.zip");
        write_zip(&archive, &[("../escaped.txt", &b"x"[..]), ("ok.txt", &b"y"[..])]);

        extract_archive(&archive, &dest).unwrap();
        assert!(dest.join("ok.txt").exists());
        assert!(!temp_dir.path().join("escaped.txt").exists());
    }

    #[test]
    fn test_extract_tar_gz() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("coreml-model.tar.gz");
        write_tar_gz(&archive, "Model.mlpackage/Manifest.json", b"{}");

        extract_archives_in(temp_dir.path()).unwrap();
        assert!(temp_dir.path().join("Model.mlpackage/Manifest.json").exists());
        assert!(!archive.exists());
    }

    #[test]
    fn test_corrupt_archive_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("broken.zip");
        std::fs::write(&archive, b"not a zip").unwrap();
        let err = extract_archive(&archive, temp_dir.path()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Storage);
    }
}
