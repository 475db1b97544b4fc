//! Download coordinator.
//!
//! Turns a (repository, backend) request into a finalized model:
//!
//! 1. List the repository and check the backend is supported
//! 2. Select candidate files, narrowing GGUF repositories to one quantization
//! 3. Validate free disk space, then create the staging directory
//! 4. Wait for an admission slot, fetch every file with per-file retries.
//!    A paused session gives its slot back and queues again on resume.
//! 5. Hand the staging directory to the [`ModelFileManager`] for finalization
//!
//! Steps 1-3 run before [`DownloadCoordinator::download`] returns, so every
//! pre-download rejection is an `Err` from that call and leaves nothing on
//! disk. Steps 4-5 run in a spawned task that reports through the returned
//! [`DownloadStream`].
//!
//! The session registry is a single mutex-guarded map. Registering,
//! cancelling, pausing and the switch to finalization all go through it.
//! Each session's progress snapshot is written only by its own task.

mod events;
mod session;
mod tracker;
mod transfer;

pub use events::{DownloadEvent, DownloadProgress, DownloadStream};
pub use session::{DownloadSession, SessionStatus};

use crate::backend::{Backend, BackendDetector};
use crate::cancel::{CancellationToken, PauseToken};
use crate::config::{CoordinatorConfig, SelectionConfig};
use crate::error::{HubError, Result};
use crate::hub::RepositoryClient;
use crate::metadata::{keys, ModelRecord};
use crate::network::retry_async;
use crate::quantization::{
    get_best_quantization, select_by_preference, QuantizationAnalyzer, QuantizationLevel,
};
use crate::selector::{is_projector, selector_for, CandidateSet};
use crate::storage::ModelFileManager;
use crate::system::total_memory_bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use tracker::SessionTracker;
use transfer::{Fetched, FileTransfer, TransferUpdate};

/// What to download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub repo_id: String,
    pub backend: Backend,
    /// Overrides the configured revision.
    pub revision: Option<String>,
    /// Explicit quantization level (GGUF only), e.g. `Q5_K_M`.
    pub quantization: Option<String>,
}

impl DownloadRequest {
    pub fn new(repo_id: impl Into<String>, backend: Backend) -> Self {
        Self {
            repo_id: repo_id.into(),
            backend,
            revision: None,
            quantization: None,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_quantization(mut self, quantization: impl Into<String>) -> Self {
        self.quantization = Some(quantization.into());
        self
    }
}

type SessionKey = (String, Backend);

struct SessionHandle {
    cancel: CancellationToken,
    pause: PauseToken,
    snapshot: watch::Receiver<DownloadSession>,
    /// Set once finalization started; cancellation no longer applies.
    finalizing: bool,
}

/// Everything decided before the transfer starts.
struct DownloadPlan {
    revision: String,
    candidates: CandidateSet,
    quantization: Option<QuantizationLevel>,
    staging: PathBuf,
}

struct Inner {
    client: Arc<dyn RepositoryClient>,
    files: Arc<ModelFileManager>,
    config: CoordinatorConfig,
    admission: Arc<Semaphore>,
    sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
}

/// Orchestrates downloads against one repository client and one store.
///
/// Cheap to clone; clones share sessions and the admission bound.
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("root", &self.inner.files.root())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl DownloadCoordinator {
    pub fn new(
        client: Arc<dyn RepositoryClient>,
        files: Arc<ModelFileManager>,
        config: CoordinatorConfig,
    ) -> Self {
        let admission = Arc::new(Semaphore::new(config.max_concurrent_sessions.max(1)));
        Self {
            inner: Arc::new(Inner {
                client,
                files,
                config,
                admission,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn file_manager(&self) -> &Arc<ModelFileManager> {
        &self.inner.files
    }

    /// Start downloading `repo_id` for `backend`.
    pub async fn download(&self, repo_id: &str, backend: Backend) -> Result<DownloadStream> {
        self.download_with(DownloadRequest::new(repo_id, backend)).await
    }

    /// Start a download.
    ///
    /// Fails before anything is written when the backend is unsupported,
    /// no candidate files exist, the requested quantization is absent,
    /// no quantization fits the memory budget, disk space is insufficient,
    /// or the same (repository, backend) is already downloading.
    pub async fn download_with(&self, request: DownloadRequest) -> Result<DownloadStream> {
        let repo_id = request.repo_id.trim().to_string();
        let backend = request.backend;
        if repo_id.is_empty() {
            return Err(HubError::Validation {
                field: "repo_id".to_string(),
                message: "repository id is empty".to_string(),
            });
        }
        if !backend.is_downloadable() {
            return Err(HubError::UnsupportedFormat { repo_id, backend });
        }

        let (snapshot_tx, snapshot_rx) = watch::channel(DownloadSession::new(&repo_id, backend));
        let cancel = CancellationToken::new();
        let pause = PauseToken::new();
        let key = (repo_id.clone(), backend);
        {
            let mut sessions = self.inner.sessions.lock().await;
            if sessions.contains_key(&key) {
                return Err(HubError::AlreadyDownloading { repo_id, backend });
            }
            sessions.insert(
                key.clone(),
                SessionHandle {
                    cancel: cancel.clone(),
                    pause: pause.clone(),
                    snapshot: snapshot_rx.clone(),
                    finalizing: false,
                },
            );
        }

        let plan = match self.inner.plan(&repo_id, &request).await {
            Ok(plan) => plan,
            Err(e) => {
                self.inner.sessions.lock().await.remove(&key);
                debug!(repo_id = %repo_id, backend = %backend, "Download rejected: {}", e);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(self.inner.config.event_channel_capacity.max(1));
        let tracker = SessionTracker::new(
            snapshot_tx,
            events::EventSender::new(tx),
            self.inner.config.progress_byte_threshold,
            self.inner.config.progress_interval,
        );
        tokio::spawn(self.inner.clone().run_session(key, plan, tracker, cancel, pause));

        Ok(DownloadStream::new(rx, snapshot_rx))
    }

    /// Cancel every session of `repo_id`. Returns whether any was signalled.
    ///
    /// Sessions already finalizing run to completion.
    pub async fn cancel(&self, repo_id: &str) -> bool {
        let sessions = self.inner.sessions.lock().await;
        let mut signalled = false;
        for ((id, backend), handle) in sessions.iter() {
            if id == repo_id.trim() && !handle.finalizing {
                info!(repo_id = %id, backend = %backend, "Cancelling download");
                handle.cancel.cancel();
                signalled = true;
            }
        }
        signalled
    }

    /// Pause every session of `repo_id`. The transfer stops at the next chunk.
    pub async fn pause(&self, repo_id: &str) -> bool {
        self.for_each_session(repo_id, |handle| handle.pause.pause()).await
    }

    /// Resume paused sessions of `repo_id` with a range request.
    pub async fn resume(&self, repo_id: &str) -> bool {
        self.for_each_session(repo_id, |handle| handle.pause.resume()).await
    }

    async fn for_each_session(&self, repo_id: &str, apply: impl Fn(&SessionHandle)) -> bool {
        let sessions = self.inner.sessions.lock().await;
        let mut found = false;
        for ((id, _), handle) in sessions.iter() {
            if id == repo_id.trim() {
                apply(handle);
                found = true;
            }
        }
        found
    }

    /// Snapshots of the live sessions of `repo_id`.
    pub async fn status(&self, repo_id: &str) -> Vec<DownloadSession> {
        let mut found: Vec<DownloadSession> = self
            .inner
            .sessions
            .lock()
            .await
            .iter()
            .filter(|((id, _), _)| id == repo_id.trim())
            .map(|(_, handle)| handle.snapshot.borrow().clone())
            .collect();
        found.sort_by_key(|s| s.backend);
        found
    }

    /// Snapshots of every live session.
    pub async fn active_sessions(&self) -> Vec<DownloadSession> {
        let mut found: Vec<DownloadSession> = self
            .inner
            .sessions
            .lock()
            .await
            .values()
            .map(|handle| handle.snapshot.borrow().clone())
            .collect();
        found.sort_by(|a, b| a.repo_id.cmp(&b.repo_id).then(a.backend.cmp(&b.backend)));
        found
    }

    pub fn model_exists(&self, repo_id: &str) -> bool {
        self.inner.files.model_exists(repo_id)
    }

    /// Delete a finalized model. Refused while it is downloading.
    pub async fn delete_model(&self, repo_id: &str) -> Result<bool> {
        let busy = self
            .inner
            .sessions
            .lock()
            .await
            .iter()
            .find(|((id, _), _)| id == repo_id.trim())
            .map(|((_, backend), _)| *backend);
        if let Some(backend) = busy {
            return Err(HubError::AlreadyDownloading {
                repo_id: repo_id.trim().to_string(),
                backend,
            });
        }
        let files = self.inner.files.clone();
        let repo_id = repo_id.trim().to_string();
        blocking(move || files.delete_model(&repo_id)).await
    }

    pub async fn list_downloaded_models(&self) -> Result<Vec<ModelRecord>> {
        let files = self.inner.files.clone();
        blocking(move || files.list_downloaded_models()).await
    }

    /// Raw model card of `repo_id` at the configured revision, if it has one.
    pub async fn model_card(&self, repo_id: &str) -> Result<Option<String>> {
        self.inner
            .client
            .model_card(repo_id, &self.inner.config.revision)
            .await
    }
}

impl Inner {
    async fn plan(&self, repo_id: &str, request: &DownloadRequest) -> Result<DownloadPlan> {
        let backend = request.backend;
        let revision = request
            .revision
            .clone()
            .unwrap_or_else(|| self.config.revision.clone());

        let (listing, _) = retry_async(&self.config.retry, &format!("listing {}", repo_id), || {
            self.client.list_files(repo_id, &revision)
        })
        .await;
        let listing = listing?;

        if !BackendDetector::new().supports(&listing, backend) {
            return Err(HubError::UnsupportedFormat {
                repo_id: repo_id.to_string(),
                backend,
            });
        }
        let selector = selector_for(backend).ok_or_else(|| HubError::UnsupportedFormat {
            repo_id: repo_id.to_string(),
            backend,
        })?;
        let mut candidates = selector.select(&listing);
        if candidates.is_empty() {
            return Err(HubError::NoCandidateFiles {
                repo_id: repo_id.to_string(),
                backend,
            });
        }

        let quantization = match (backend, request.quantization.as_deref()) {
            (Backend::Gguf, requested) => self.narrow_quantization(repo_id, &mut candidates, requested)?,
            (_, Some(requested)) => {
                return Err(HubError::Validation {
                    field: "quantization".to_string(),
                    message: format!("'{}' requested for {} which has no quantization levels", requested, backend),
                })
            }
            (_, None) => None,
        };

        let known_size = candidates.known_size();
        self.files
            .validate_space(repo_id, backend, known_size, self.config.space_multiplier)?;
        let staging = self.files.create_staging_dir(repo_id, backend)?;

        info!(
            repo_id,
            backend = %backend,
            files = candidates.len(),
            bytes = known_size,
            unknown_sizes = candidates.unknown_size_count(),
            "Planned download"
        );
        Ok(DownloadPlan {
            revision,
            candidates,
            quantization,
            staging,
        })
    }

    /// Keep one quantization level among the GGUF weights.
    ///
    /// Companions and projectors are always kept; weights of other levels
    /// and weights without a recognizable level are dropped.
    fn narrow_quantization(
        &self,
        repo_id: &str,
        candidates: &mut CandidateSet,
        requested: Option<&str>,
    ) -> Result<Option<QuantizationLevel>> {
        let infos = QuantizationAnalyzer::new().analyze(candidates.files());
        if infos.is_empty() {
            if let Some(requested) = requested {
                return Err(HubError::QuantizationNotFound {
                    repo_id: repo_id.to_string(),
                    requested: requested.to_string(),
                    available: Vec::new(),
                });
            }
            return Ok(None);
        }

        let min_quality = self.config.min_quality;
        let chosen = match requested {
            Some(name) => {
                let level = name.parse::<QuantizationLevel>().ok();
                infos
                    .iter()
                    .find(|info| Some(info.level) == level)
                    .ok_or_else(|| {
                        let mut available: Vec<String> =
                            infos.iter().map(|info| info.level.to_string()).collect();
                        available.dedup();
                        HubError::QuantizationNotFound {
                            repo_id: repo_id.to_string(),
                            requested: name.to_string(),
                            available,
                        }
                    })?
            }
            None => {
                let budget = self
                    .config
                    .memory_budget_bytes
                    .or_else(|| Some(total_memory_bytes()).filter(|bytes| *bytes > 0));
                let sized = infos.iter().any(|info| info.estimated_memory_bytes.is_some());
                let budget = budget.filter(|_| sized);
                let best = match budget {
                    Some(budget) => get_best_quantization(&infos, budget, min_quality),
                    None => select_by_preference(
                        &infos,
                        SelectionConfig::DEFAULT_QUANT_PREFERENCE,
                        min_quality,
                    ),
                };
                best.ok_or_else(|| HubError::NoSuitableQuantization {
                    repo_id: repo_id.to_string(),
                    memory_budget_bytes: budget,
                    min_quality,
                })?
            }
        };

        let keep: HashSet<&str> = chosen.files.iter().map(|f| f.path.as_str()).collect();
        candidates.retain(|f| {
            !Backend::Gguf.matches_weights(&f.path) || is_projector(f) || keep.contains(f.path.as_str())
        });
        info!(
            repo_id,
            level = %chosen.level,
            estimated_memory = ?chosen.estimated_memory_bytes,
            "Selected quantization"
        );
        Ok(Some(chosen.level))
    }

    async fn run_session(
        self: Arc<Self>,
        key: SessionKey,
        plan: DownloadPlan,
        mut tracker: SessionTracker,
        cancel: CancellationToken,
        pause: PauseToken,
    ) {
        let (repo_id, backend) = (key.0.clone(), key.1);
        let outcome = self
            .execute(&key, &plan, &mut tracker, &cancel, &pause)
            .await;

        let terminal = match outcome {
            Ok(record) => {
                tracker.set_status(SessionStatus::Completed);
                info!(
                    repo_id = %repo_id,
                    backend = %backend,
                    bytes = record.total_size_bytes,
                    "Download completed"
                );
                Some(Ok(DownloadEvent::Completed(record)))
            }
            Err(HubError::Cancelled) => {
                let files = self.files.clone();
                let (id, b) = (repo_id.clone(), backend);
                if let Err(e) = blocking(move || files.remove_staging_dir(&id, b)).await {
                    warn!(repo_id = %repo_id, "Failed to remove staging directory: {}", e);
                }
                tracker.set_status(SessionStatus::Cancelled);
                info!(repo_id = %repo_id, backend = %backend, "Download cancelled");
                None
            }
            Err(e) => {
                tracker.set_status(SessionStatus::Failed);
                warn!(
                    repo_id = %repo_id,
                    backend = %backend,
                    category = %e.category(),
                    "Download failed: {}",
                    e
                );
                Some(Err(e))
            }
        };

        self.sessions.lock().await.remove(&key);
        if let Some(terminal) = terminal {
            tracker.into_events().finish(terminal).await;
        }
    }

    async fn execute(
        &self,
        key: &SessionKey,
        plan: &DownloadPlan,
        tracker: &mut SessionTracker,
        cancel: &CancellationToken,
        pause: &PauseToken,
    ) -> Result<ModelRecord> {
        let (repo_id, backend) = (key.0.as_str(), key.1);
        tracker.plan(plan.candidates.len(), plan.candidates.known_size());

        let transfer = FileTransfer {
            client: self.client.as_ref(),
            repo_id,
            backend,
            revision: &plan.revision,
            staging: &plan.staging,
            retry: &self.config.retry,
            idle_timeout: self.config.chunk_idle_timeout,
            cancel,
            pause,
        };
        // Held only while bytes may flow. A paused session gives its slot back.
        let mut permit: Option<OwnedSemaphorePermit> = None;
        let mut started = false;
        for file in plan.candidates.files() {
            tracker.start_file(file);
            let size = loop {
                cancel.check()?;
                if pause.is_paused() {
                    if permit.take().is_some() {
                        debug!(repo_id, backend = %backend, "Released admission slot while paused");
                    }
                    tracker.update(TransferUpdate::Paused);
                    tokio::select! {
                        _ = pause.resumed() => {}
                        _ = cancel.cancelled() => return Err(HubError::Cancelled),
                    }
                    tracker.update(TransferUpdate::Resumed);
                }
                if permit.is_none() {
                    tracker.set_status(SessionStatus::NotStarted);
                    permit = Some(self.admit(cancel).await?);
                    tracker.set_status(SessionStatus::Downloading);
                    if !started {
                        started = true;
                        info!(repo_id, backend = %backend, files = plan.candidates.len(), "Download started");
                    }
                }
                match transfer
                    .fetch_file(file, &mut |update| tracker.update(update))
                    .await?
                {
                    Fetched::Complete(size) => break size,
                    Fetched::Paused => continue,
                }
            };
            tracker.finish_file(file, size);
        }
        drop(permit);

        {
            let mut sessions = self.sessions.lock().await;
            cancel.check()?;
            if let Some(handle) = sessions.get_mut(key) {
                handle.finalizing = true;
            }
        }

        let mut metadata = BTreeMap::from([
            (keys::REVISION.to_string(), plan.revision.clone()),
            (keys::FILE_COUNT.to_string(), plan.candidates.len().to_string()),
        ]);
        if let Some(level) = plan.quantization {
            metadata.insert(keys::QUANTIZATION.to_string(), level.to_string());
        }

        let files = self.files.clone();
        let (id, staging, total) = (repo_id.to_string(), plan.staging.clone(), tracker.completed_bytes());
        blocking(move || files.finalize_download(&id, &id, backend, &staging, total, metadata)).await
    }

    /// Wait for an admission slot without holding a connection.
    async fn admit(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit> {
        tokio::select! {
            permit = self.admission.clone().acquire_owned() => permit
                .map_err(|_| HubError::Other("admission semaphore closed".to_string())),
            _ = cancel.cancelled() => Err(HubError::Cancelled),
        }
    }
}

/// Run blocking filesystem work off the async workers.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| HubError::Other(format!("Blocking task failed: {}", e)))?
}
