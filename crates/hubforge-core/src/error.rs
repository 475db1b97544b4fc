//! Error types for the model acquisition engine.
//!
//! Every fallible operation returns [`HubError`]. Variants carry enough
//! structured context (repository id, backend, byte counts) to render an
//! actionable message, and [`HubError::category`] folds them onto the small
//! taxonomy the download coordinator reasons about.

use crate::backend::Backend;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for hubforge.
#[derive(Debug, Error)]
pub enum HubError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited by {service}, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Server error {status} for {url}")]
    ServerError { status: u16, url: String },

    #[error("Unexpected HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// 416 on a resumed fetch. `total_len` comes from `Content-Range: bytes */N`.
    #[error("Requested range not satisfiable for {url}")]
    RangeNotSatisfiable { url: String, total_len: Option<u64> },

    // Hub errors
    #[error("Repository not found: {repo_id}")]
    RepositoryNotFound { repo_id: String },

    #[error("File not found in {repo_id}: {path}")]
    FileNotFound { repo_id: String, path: String },

    #[error("Not authorized to access {repo_id}")]
    Unauthorized { repo_id: String },

    // Pre-download rejections
    #[error("Unsupported format: {repo_id} cannot be downloaded for backend {backend}")]
    UnsupportedFormat { repo_id: String, backend: Backend },

    #[error("No candidate files found in {repo_id} for backend {backend}")]
    NoCandidateFiles { repo_id: String, backend: Backend },

    #[error(
        "Quantization '{requested}' not found for {repo_id}. Available: {}",
        available.join(", ")
    )]
    QuantizationNotFound {
        repo_id: String,
        requested: String,
        available: Vec<String>,
    },

    #[error(
        "No quantization of {repo_id} {}with quality >= {min_quality}",
        fits_clause(memory_budget_bytes)
    )]
    NoSuitableQuantization {
        repo_id: String,
        /// `None` when sizes were unknown and no budget was applied.
        memory_budget_bytes: Option<u64>,
        min_quality: f64,
    },

    #[error(
        "Insufficient disk space for {repo_id} ({backend}): {required_bytes} bytes required, {available_bytes} available"
    )]
    InsufficientSpace {
        repo_id: String,
        backend: Backend,
        required_bytes: u64,
        available_bytes: u64,
    },

    #[error("Download already in progress for {repo_id} ({backend})")]
    AlreadyDownloading { repo_id: String, backend: Backend },

    // Session-level failure wrapping the last file-level error
    #[error("Failed to download {path} from {repo_id} ({backend}) after {attempts} attempt(s): {source}")]
    TransferFailed {
        repo_id: String,
        backend: Backend,
        path: String,
        attempts: u32,
        #[source]
        source: Box<HubError>,
    },

    #[error("Download cancelled")]
    Cancelled,

    // Validation errors
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Storage errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Archive error for {path:?}: {message}")]
    Archive { path: PathBuf, message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

fn fits_clause(budget: &Option<u64>) -> String {
    budget
        .map(|bytes| format!("fits {} bytes ", bytes))
        .unwrap_or_default()
}

/// Result type alias for hubforge operations.
pub type Result<T> = std::result::Result<T, HubError>;

/// Coarse classification of a [`HubError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection loss, timeouts, 5xx, rate limiting. Retried.
    TransientNetwork,
    /// Repository or file absent.
    NotFound,
    /// No backend detected, or the requested backend cannot be served.
    UnsupportedFormat,
    /// Not enough free disk space for the candidate set.
    InsufficientSpace,
    /// Credentials missing or rejected.
    Authorization,
    /// Checksum, quantization or argument validation failures.
    Validation,
    /// Local filesystem or archive failures.
    Storage,
    /// Cooperative cancellation. Never surfaced as a session failure.
    Cancelled,
    /// Everything else.
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::TransientNetwork => "transient-network",
            ErrorCategory::NotFound => "not-found",
            ErrorCategory::UnsupportedFormat => "unsupported-format",
            ErrorCategory::InsufficientSpace => "insufficient-space",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl From<std::io::Error> for HubError {
    fn from(err: std::io::Error) -> Self {
        HubError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for HubError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest does not say which of its timeouts fired
        let message = if err.is_timeout() {
            format!("Request timed out: {}", err)
        } else {
            err.to_string()
        };
        HubError::Network {
            message,
            cause: err.url().map(|u| u.to_string()),
        }
    }
}

impl From<zip::result::ZipError> for HubError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => HubError::from(io),
            other => HubError::Archive {
                path: PathBuf::new(),
                message: other.to_string(),
            },
        }
    }
}

impl HubError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        HubError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            HubError::Network { .. }
            | HubError::Timeout(_)
            | HubError::RateLimited { .. }
            | HubError::ServerError { .. } => ErrorCategory::TransientNetwork,

            HubError::RepositoryNotFound { .. }
            | HubError::FileNotFound { .. } => ErrorCategory::NotFound,

            HubError::UnsupportedFormat { .. } | HubError::NoCandidateFiles { .. } => {
                ErrorCategory::UnsupportedFormat
            }

            HubError::InsufficientSpace { .. } => ErrorCategory::InsufficientSpace,

            HubError::Unauthorized { .. } => ErrorCategory::Authorization,

            HubError::ChecksumMismatch { .. }
            | HubError::Validation { .. }
            | HubError::QuantizationNotFound { .. }
            | HubError::NoSuitableQuantization { .. } => ErrorCategory::Validation,

            HubError::Io { .. } | HubError::Archive { .. } | HubError::Json { .. } => {
                ErrorCategory::Storage
            }

            HubError::Cancelled => ErrorCategory::Cancelled,

            HubError::TransferFailed { source, .. } => source.category(),

            HubError::HttpStatus { .. }
            | HubError::RangeNotSatisfiable { .. }
            | HubError::AlreadyDownloading { .. }
            | HubError::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::TransientNetwork
    }

    /// Server-provided retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            HubError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HubError::InsufficientSpace {
            repo_id: "org/model".into(),
            backend: Backend::Gguf,
            required_bytes: 2048,
            available_bytes: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient disk space for org/model (gguf): 2048 bytes required, 1024 available"
        );
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            HubError::Unauthorized {
                repo_id: "a/b".into()
            }
            .category(),
            ErrorCategory::Authorization
        );
        assert_eq!(
            HubError::ServerError {
                status: 503,
                url: "https://x".into()
            }
            .category(),
            ErrorCategory::TransientNetwork
        );
        assert_eq!(HubError::Cancelled.category(), ErrorCategory::Cancelled);
    }

    #[test]
    fn test_transfer_failed_inherits_source_category() {
        let err = HubError::TransferFailed {
            repo_id: "a/b".into(),
            backend: Backend::Mlx,
            path: "model.safetensors".into(),
            attempts: 4,
            source: Box::new(HubError::Timeout(Duration::from_secs(30))),
        };
        assert_eq!(err.category(), ErrorCategory::TransientNetwork);
        assert!(err.to_string().contains("after 4 attempt(s)"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(HubError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(!HubError::FileNotFound {
            repo_id: "a/b".into(),
            path: "x.gguf".into()
        }
        .is_retryable());
        assert!(!HubError::ChecksumMismatch {
            path: "x".into(),
            expected: "aa".into(),
            actual: "bb".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_no_suitable_quantization_display() {
        let budgeted = HubError::NoSuitableQuantization {
            repo_id: "org/model".into(),
            memory_budget_bytes: Some(60),
            min_quality: 0.3,
        };
        assert_eq!(
            budgeted.to_string(),
            "No quantization of org/model fits 60 bytes with quality >= 0.3"
        );

        let unbudgeted = HubError::NoSuitableQuantization {
            repo_id: "org/model".into(),
            memory_budget_bytes: None,
            min_quality: 0.5,
        };
        assert_eq!(
            unbudgeted.to_string(),
            "No quantization of org/model with quality >= 0.5"
        );
    }

    #[tokio::test]
    async fn test_reqwest_timeout_is_transient_with_readable_message() {
        // Accepted by the kernel backlog, never answered
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();

        let err: HubError = client.get(&url).send().await.unwrap_err().into();
        assert!(err.is_retryable());
        let message = err.to_string();
        assert!(message.contains("timed out"), "{}", message);
        assert!(!message.contains("0ns"), "{}", message);
    }

    #[test]
    fn test_retry_after_hint() {
        let err = HubError::RateLimited {
            service: "huggingface".into(),
            retry_after_secs: Some(7),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(HubError::Cancelled.retry_after(), None);
    }
}
