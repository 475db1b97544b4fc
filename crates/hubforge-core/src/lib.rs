//! Hubforge Core - model acquisition engine.
//!
//! Decides which files of a model hub repository a runtime backend needs,
//! picks a quantization that fits the memory budget, downloads the files
//! concurrently with retry, pause and cancellation, and finalizes them
//! atomically into an identity-addressed store on disk.
//!
//! # Example
//!
//! ```rust,no_run
//! use hubforge_core::{Backend, CoordinatorConfig, DownloadCoordinator, HttpRepositoryClient};
//! use hubforge_core::storage::ModelFileManager;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> hubforge_core::Result<()> {
//!     let client = Arc::new(HttpRepositoryClient::new()?);
//!     let files = Arc::new(ModelFileManager::new("./models")?);
//!     let coordinator = DownloadCoordinator::new(client, files, CoordinatorConfig::default());
//!
//!     let stream = coordinator
//!         .download("TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF", Backend::Gguf)
//!         .await?;
//!     if let Some(record) = stream.wait().await? {
//!         println!("{} -> {}", record.id, record.storage_path.display());
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cancel;
pub mod config;
pub mod download;
pub mod error;
pub mod hub;
pub mod identity;
pub mod metadata;
pub mod network;
pub mod quantization;
pub mod selector;
pub mod storage;
pub mod system;

// Re-export commonly used types
pub use backend::{Backend, BackendDetector};
pub use cancel::{CancellationToken, PauseToken};
pub use config::CoordinatorConfig;
pub use download::{
    DownloadCoordinator, DownloadEvent, DownloadProgress, DownloadRequest, DownloadSession,
    DownloadStream, SessionStatus,
};
pub use error::{ErrorCategory, HubError, Result};
pub use hub::{HttpRepositoryClient, RepositoryClient, RepositoryFile};
pub use identity::ModelIdentity;
pub use metadata::ModelRecord;
pub use network::RetryPolicy;
pub use quantization::{QuantizationAnalyzer, QuantizationInfo, QuantizationLevel};
pub use selector::{CandidateSet, FileSelector};
pub use storage::ModelFileManager;
