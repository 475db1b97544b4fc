//! Single-file transfer into a staging directory.
//!
//! Bytes land in `<dest>.part` and the file is renamed into place once it
//! is complete (and its checksum matched, when the listing carried one).
//! Retries resume from the `.part` length with a range request. A pause
//! returns control to the caller with the `.part` file left in place.

use crate::backend::Backend;
use crate::cancel::{CancellationToken, PauseToken};
use crate::config::NetworkConfig;
use crate::error::{HubError, Result};
use crate::hub::{FetchedBody, RepositoryClient, RepositoryFile};
use crate::network::{RetryDecision, RetryPolicy};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Notifications from a running transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferUpdate {
    /// Bytes of the current file on disk so far.
    Bytes(u64),
    Paused,
    Resumed,
}

/// Outcome of [`FileTransfer::fetch_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fetched {
    /// The file is in place with this many bytes.
    Complete(u64),
    /// The pause token was set. Call again after resuming.
    Paused,
}

enum Attempt {
    Complete(u64),
    Paused,
}

/// Everything needed to fetch files of one session.
pub(crate) struct FileTransfer<'a> {
    pub client: &'a dyn RepositoryClient,
    pub repo_id: &'a str,
    pub backend: Backend,
    pub revision: &'a str,
    pub staging: &'a Path,
    pub retry: &'a RetryPolicy,
    pub idle_timeout: Duration,
    pub cancel: &'a CancellationToken,
    pub pause: &'a PauseToken,
}

impl FileTransfer<'_> {
    /// Fetch `file` into the staging directory.
    ///
    /// A file already present with the listed size is reused. Errors other
    /// than cancellation come back as [`HubError::TransferFailed`].
    pub(crate) async fn fetch_file(
        &self,
        file: &RepositoryFile,
        report: &mut (dyn FnMut(TransferUpdate) + Send),
    ) -> Result<Fetched> {
        let dest = staged_path(self.staging, &file.path)?;
        if let Some(size) = existing_complete(&dest, file.size).await {
            debug!(repo_id = self.repo_id, path = %file.path, "Reusing staged file");
            report(TransferUpdate::Bytes(size));
            return Ok(Fetched::Complete(size));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HubError::io_with_path(e, parent))?;
        }

        let part = part_path(&dest);
        let mut attempt = 0u32;
        let written = loop {
            self.cancel.check()?;
            if self.pause.is_paused() {
                return Ok(Fetched::Paused);
            }

            match self.attempt(file, &part, report).await {
                Ok(Attempt::Complete(written)) => break written,
                Ok(Attempt::Paused) => return Ok(Fetched::Paused),
                Err(HubError::Cancelled) => return Err(HubError::Cancelled),
                Err(e) => match self.retry.decide(attempt, &e) {
                    RetryDecision::GiveUp => return Err(self.failed(file, attempt + 1, e)),
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            repo_id = self.repo_id,
                            path = %file.path,
                            "Attempt {}/{} failed: {}. Retrying in {:?}",
                            attempt + 1,
                            self.retry.max_attempts,
                            e,
                            delay
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.cancel.cancelled() => return Err(HubError::Cancelled),
                        }
                        attempt += 1;
                    }
                },
            }
        };

        if let Some(expected) = file.sha256() {
            let actual = sha256_file(part.clone()).await?;
            if !actual.eq_ignore_ascii_case(expected) {
                let _ = tokio::fs::remove_file(&part).await;
                let mismatch = HubError::ChecksumMismatch {
                    path: file.path.clone(),
                    expected: expected.to_string(),
                    actual,
                };
                return Err(self.failed(file, attempt + 1, mismatch));
            }
        }

        tokio::fs::rename(&part, &dest)
            .await
            .map_err(|e| HubError::io_with_path(e, &dest))?;
        debug!(repo_id = self.repo_id, path = %file.path, bytes = written, "File complete");
        Ok(Fetched::Complete(written))
    }

    async fn attempt(
        &self,
        file: &RepositoryFile,
        part: &Path,
        report: &mut (dyn FnMut(TransferUpdate) + Send),
    ) -> Result<Attempt> {
        let mut offset = tokio::fs::metadata(part).await.map(|m| m.len()).unwrap_or(0);
        if let Some(size) = file.size {
            if offset > size {
                offset = 0;
            } else if offset == size && size > 0 {
                return Ok(Attempt::Complete(size));
            }
        }

        let body = match self.open(file, offset).await {
            // The server has nothing past the end of the part file
            Err(HubError::RangeNotSatisfiable { total_len, .. }) if offset > 0 => {
                if total_len == Some(offset) {
                    debug!(path = %file.path, offset, "Partial file already complete");
                    return Ok(Attempt::Complete(offset));
                }
                warn!(
                    path = %file.path,
                    offset,
                    total = ?total_len,
                    "Range not satisfiable, restarting from zero"
                );
                tokio::fs::remove_file(part)
                    .await
                    .map_err(|e| HubError::io_with_path(e, part))?;
                offset = 0;
                self.open(file, 0).await?
            }
            other => other?,
        };

        let resumed = offset > 0 && body.offset == offset;
        if resumed {
            debug!(path = %file.path, offset, "Resuming partial file");
        }
        let mut out = if resumed {
            tokio::fs::OpenOptions::new().append(true).open(part).await
        } else {
            tokio::fs::File::create(part).await
        }
        .map_err(|e| HubError::io_with_path(e, part))?;

        let expected = file.size.or(body.total_len);
        let mut written = if resumed { offset } else { 0 };
        let mut stream = body.stream;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(HubError::Cancelled),
                next = tokio::time::timeout(self.idle_timeout, stream.next()) => {
                    next.map_err(|_| HubError::Timeout(self.idle_timeout))?
                }
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            out.write_all(&chunk)
                .await
                .map_err(|e| HubError::io_with_path(e, part))?;
            written += chunk.len() as u64;
            report(TransferUpdate::Bytes(written));

            self.cancel.check()?;
            if self.pause.is_paused() {
                out.flush().await.map_err(|e| HubError::io_with_path(e, part))?;
                debug!(path = %file.path, written, "Paused mid-file");
                return Ok(Attempt::Paused);
            }
        }
        out.flush().await.map_err(|e| HubError::io_with_path(e, part))?;

        if let Some(total) = expected {
            if written != total {
                return Err(HubError::Network {
                    message: format!(
                        "Incomplete download of {}: got {} of {} bytes",
                        file.path, written, total
                    ),
                    cause: None,
                });
            }
        }
        Ok(Attempt::Complete(written))
    }

    async fn open(&self, file: &RepositoryFile, offset: u64) -> Result<FetchedBody> {
        tokio::time::timeout(
            self.idle_timeout,
            self.client.fetch(self.repo_id, &file.path, self.revision, offset),
        )
        .await
        .map_err(|_| HubError::Timeout(self.idle_timeout))?
    }

    fn failed(&self, file: &RepositoryFile, attempts: u32, source: HubError) -> HubError {
        HubError::TransferFailed {
            repo_id: self.repo_id.to_string(),
            backend: self.backend,
            path: file.path.clone(),
            attempts,
            source: Box::new(source),
        }
    }
}

/// Join a repository path onto the staging directory, refusing anything
/// that would land outside it.
pub(crate) fn staged_path(staging: &Path, repo_path: &str) -> Result<PathBuf> {
    let relative = Path::new(repo_path);
    let safe = !repo_path.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(HubError::Validation {
            field: "path".to_string(),
            message: format!("unsafe repository path '{}'", repo_path),
        });
    }
    Ok(staging.join(relative))
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(NetworkConfig::DOWNLOAD_TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Size of `dest` if it is already complete. A stale file of the wrong
/// size is removed.
async fn existing_complete(dest: &Path, listed: Option<u64>) -> Option<u64> {
    let meta = tokio::fs::metadata(dest).await.ok()?;
    if !meta.is_file() {
        return None;
    }
    match listed {
        Some(size) if size != meta.len() => {
            let _ = tokio::fs::remove_file(dest).await;
            None
        }
        _ => Some(meta.len()),
    }
}

async fn sha256_file(path: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path).map_err(|e| HubError::io_with_path(e, &path))?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher).map_err(|e| HubError::io_with_path(e, &path))?;
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| HubError::Other(format!("Hash task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves one file. Optionally ignores ranges or fails the first fetches.
    /// A range starting at or past the end gets a 416 carrying `reported_len`.
    struct OneFile {
        data: Vec<u8>,
        honour_ranges: bool,
        reported_len: Option<u64>,
        failures: Mutex<Vec<HubError>>,
        offsets: Mutex<Vec<u64>>,
    }

    impl OneFile {
        fn new(data: &[u8]) -> Self {
            Self {
                data: data.to_vec(),
                honour_ranges: true,
                reported_len: Some(data.len() as u64),
                failures: Mutex::new(Vec::new()),
                offsets: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RepositoryClient for OneFile {
        async fn list_files(&self, _: &str, _: &str) -> Result<Vec<RepositoryFile>> {
            Ok(vec![])
        }

        async fn fetch(&self, _: &str, _: &str, _: &str, offset: u64) -> Result<FetchedBody> {
            self.offsets.lock().unwrap().push(offset);
            if let Some(err) = self.failures.lock().unwrap().pop() {
                return Err(err);
            }
            if self.honour_ranges && offset > 0 && offset >= self.data.len() as u64 {
                return Err(HubError::RangeNotSatisfiable {
                    url: "https://hub.test/model.gguf".into(),
                    total_len: self.reported_len,
                });
            }
            let start = if self.honour_ranges { offset } else { 0 };
            let chunks: Vec<Result<Bytes>> = self.data[start as usize..]
                .chunks(4)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            Ok(FetchedBody {
                offset: start,
                total_len: Some(self.data.len() as u64),
                stream: futures::stream::iter(chunks).boxed(),
            })
        }

        async fn model_card(&self, _: &str, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    struct Fixture {
        _tmp: TempDir,
        staging: PathBuf,
        retry: RetryPolicy,
        cancel: CancellationToken,
        pause: PauseToken,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let staging = tmp.path().join("staging");
            std::fs::create_dir_all(&staging).unwrap();
            Self {
                _tmp: tmp,
                staging,
                retry: RetryPolicy::new()
                    .with_base_delay(Duration::from_millis(1))
                    .with_jitter(false),
                cancel: CancellationToken::new(),
                pause: PauseToken::new(),
            }
        }

        fn transfer<'a>(&'a self, client: &'a dyn RepositoryClient) -> FileTransfer<'a> {
            FileTransfer {
                client,
                repo_id: "org/model",
                backend: Backend::Gguf,
                revision: "main",
                staging: &self.staging,
                retry: &self.retry,
                idle_timeout: Duration::from_secs(5),
                cancel: &self.cancel,
                pause: &self.pause,
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_writes_file_and_reports_bytes() {
        let fixture = Fixture::new();
        let client = OneFile::new(b"0123456789");
        let file = RepositoryFile::new("dir/model.gguf", Some(10));

        let mut seen = Vec::new();
        let size = fixture
            .transfer(&client)
            .fetch_file(&file, &mut |u| seen.push(u))
            .await
            .unwrap();

        assert_eq!(size, Fetched::Complete(10));
        let dest = fixture.staging.join("dir/model.gguf");
        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
        assert!(!part_path(&dest).exists());
        assert_eq!(seen.last(), Some(&TransferUpdate::Bytes(10)));
    }

    #[tokio::test]
    async fn test_resume_from_partial_file() {
        let fixture = Fixture::new();
        let client = OneFile::new(b"0123456789");
        let dest = fixture.staging.join("model.gguf");
        std::fs::write(part_path(&dest), b"012345").unwrap();

        let file = RepositoryFile::new("model.gguf", Some(10));
        fixture
            .transfer(&client)
            .fetch_file(&file, &mut |_| {})
            .await
            .unwrap();

        assert_eq!(*client.offsets.lock().unwrap(), vec![6]);
        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_ignored_range_restarts_from_zero() {
        let fixture = Fixture::new();
        let mut client = OneFile::new(b"0123456789");
        client.honour_ranges = false;
        let dest = fixture.staging.join("model.gguf");
        std::fs::write(part_path(&dest), b"xxxx").unwrap();

        let file = RepositoryFile::new("model.gguf", Some(10));
        fixture
            .transfer(&client)
            .fetch_file(&file, &mut |_| {})
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_transient_error_retried() {
        let fixture = Fixture::new();
        let client = OneFile::new(b"abcd");
        client.failures.lock().unwrap().push(HubError::ServerError {
            status: 502,
            url: "x".into(),
        });

        let file = RepositoryFile::new("model.gguf", Some(4));
        fixture
            .transfer(&client)
            .fetch_file(&file, &mut |_| {})
            .await
            .unwrap();
        assert_eq!(client.offsets.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_not_retried() {
        let fixture = Fixture::new();
        let client = OneFile::new(b"abcd");
        let file = RepositoryFile::new("model.gguf", Some(4)).with_checksum("0".repeat(64));

        let err = fixture
            .transfer(&client)
            .fetch_file(&file, &mut |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(matches!(err, HubError::TransferFailed { attempts: 1, .. }));
        assert_eq!(client.offsets.lock().unwrap().len(), 1);
        assert!(!fixture.staging.join("model.gguf").exists());
    }

    #[tokio::test]
    async fn test_checksum_match_accepted() {
        let fixture = Fixture::new();
        let client = OneFile::new(b"abcd");
        let digest = hex::encode(Sha256::digest(b"abcd"));
        let file = RepositoryFile::new("model.gguf", Some(4)).with_checksum(digest);

        fixture
            .transfer(&client)
            .fetch_file(&file, &mut |_| {})
            .await
            .unwrap();
        assert!(fixture.staging.join("model.gguf").exists());
    }

    #[tokio::test]
    async fn test_completed_file_reused() {
        let fixture = Fixture::new();
        let client = OneFile::new(b"abcd");
        std::fs::write(fixture.staging.join("model.gguf"), b"abcd").unwrap();

        let file = RepositoryFile::new("model.gguf", Some(4));
        let size = fixture
            .transfer(&client)
            .fetch_file(&file, &mut |_| {})
            .await
            .unwrap();
        assert_eq!(size, Fetched::Complete(4));
        assert!(client.offsets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fixture = Fixture::new();
        let client = OneFile::new(b"abcd");
        fixture.cancel.cancel();

        let file = RepositoryFile::new("model.gguf", Some(4));
        let err = fixture
            .transfer(&client)
            .fetch_file(&file, &mut |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Cancelled));
    }

    #[tokio::test]
    async fn test_unlisted_size_complete_part_finishes() {
        let fixture = Fixture::new();
        let client = OneFile::new(b"abcd");
        let dest = fixture.staging.join("model.gguf");
        std::fs::write(part_path(&dest), b"abcd").unwrap();

        let file = RepositoryFile::new("model.gguf", None);
        let fetched = fixture
            .transfer(&client)
            .fetch_file(&file, &mut |_| {})
            .await
            .unwrap();

        assert_eq!(fetched, Fetched::Complete(4));
        assert_eq!(*client.offsets.lock().unwrap(), vec![4]);
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcd");
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_oversized_part_restarts_on_unsatisfiable_range() {
        let fixture = Fixture::new();
        let mut client = OneFile::new(b"abcd");
        client.reported_len = Some(4);
        let dest = fixture.staging.join("model.gguf");
        std::fs::write(part_path(&dest), b"abcdef").unwrap();

        let file = RepositoryFile::new("model.gguf", None);
        let fetched = fixture
            .transfer(&client)
            .fetch_file(&file, &mut |_| {})
            .await
            .unwrap();

        assert_eq!(fetched, Fetched::Complete(4));
        assert_eq!(*client.offsets.lock().unwrap(), vec![6, 0]);
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn test_paused_returns_without_fetching() {
        let fixture = Fixture::new();
        let client = OneFile::new(b"abcd");
        fixture.pause.pause();

        let file = RepositoryFile::new("model.gguf", Some(4));
        let fetched = fixture
            .transfer(&client)
            .fetch_file(&file, &mut |_| {})
            .await
            .unwrap();
        assert_eq!(fetched, Fetched::Paused);
        assert!(client.offsets.lock().unwrap().is_empty());
    }

    #[test]
    fn test_staged_path_rejects_escapes() {
        let staging = Path::new("/tmp/staging");
        assert!(staged_path(staging, "a/b.gguf").is_ok());
        assert!(staged_path(staging, "../evil").is_err());
        assert!(staged_path(staging, "/etc/passwd").is_err());
        assert!(staged_path(staging, "").is_err());
    }
}
