//! Centralized configuration for hubforge.
//!
//! Compile-time constants are grouped in unit structs. Runtime knobs for the
//! download coordinator live in [`CoordinatorConfig`].

use crate::network::RetryPolicy;
use std::time::Duration;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const HF_HUB_BASE: &'static str = "https://huggingface.co";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CHUNK_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
    pub const MAX_RETRIES: u32 = 4;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(60);
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
    pub const USER_AGENT: &'static str = concat!("hubforge/", env!("CARGO_PKG_VERSION"));
}

/// On-disk layout configuration.
pub struct StorageConfig;

impl StorageConfig {
    pub const STAGING_DIR_NAME: &'static str = ".staging";
    pub const METADATA_FILENAME: &'static str = "model_record.json";
    /// Prefix of directories being swapped out or deleted.
    pub const TRASH_PREFIX: &'static str = ".trash-";
    pub const ARCHIVE_SPACE_MULTIPLIER: f64 = 2.0;
    pub const DEFAULT_SPACE_MULTIPLIER: f64 = 1.1;
}

/// Variant and quantization selection configuration.
pub struct SelectionConfig;

impl SelectionConfig {
    /// Memory headroom needed beyond the on-disk weight size.
    pub const RUNTIME_OVERHEAD_MULTIPLIER: f64 = 1.2;
    pub const DEFAULT_MIN_QUALITY: f64 = 0.3;
    /// Fallback order when no quantization candidate carries a size.
    pub const DEFAULT_QUANT_PREFERENCE: &'static [&'static str] =
        &["Q4_K_M", "Q5_K_M", "Q4_K_S", "Q5_K_S", "Q6_K", "Q8_0"];
    /// Top-level packaged variants, most preferred first.
    pub const VARIANT_PRIORITY: &'static [&'static str] = &["split_einsum", "original"];
    /// Second-level packaged variants, most preferred first.
    pub const SUBVARIANT_PRIORITY: &'static [&'static str] = &["compiled", "packages"];
}

/// Runtime configuration for the download coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Sessions allowed to transfer bytes at once.
    pub max_concurrent_sessions: usize,
    /// Minimum bytes between two progress events.
    pub progress_byte_threshold: u64,
    /// Minimum time between two progress events.
    pub progress_interval: Duration,
    /// Capacity of each session's event channel.
    pub event_channel_capacity: usize,
    /// A chunk that takes longer than this is a timeout.
    pub chunk_idle_timeout: Duration,
    /// Repository revision to download.
    pub revision: String,
    /// Memory budget for quantization selection. `None` uses total system RAM.
    pub memory_budget_bytes: Option<u64>,
    /// Minimum acceptable quantization quality score.
    pub min_quality: f64,
    /// Overrides the per-backend disk space multiplier.
    pub space_multiplier: Option<f64>,
    /// Per-file retry policy.
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 2,
            progress_byte_threshold: 1024 * 1024,
            progress_interval: Duration::from_millis(250),
            event_channel_capacity: 16,
            chunk_idle_timeout: NetworkConfig::CHUNK_IDLE_TIMEOUT,
            revision: "main".to_string(),
            memory_budget_bytes: None,
            min_quality: SelectionConfig::DEFAULT_MIN_QUALITY,
            space_multiplier: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the admission bound. Zero is treated as one.
    pub fn with_max_concurrent_sessions(mut self, max: usize) -> Self {
        self.max_concurrent_sessions = max.max(1);
        self
    }

    pub fn with_progress_byte_threshold(mut self, bytes: u64) -> Self {
        self.progress_byte_threshold = bytes;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Set the event channel capacity. Zero is treated as one.
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    pub fn with_chunk_idle_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_idle_timeout = timeout;
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget_bytes = Some(bytes);
        self
    }

    pub fn with_min_quality(mut self, quality: f64) -> Self {
        self.min_quality = quality.clamp(0.0, 1.0);
        self
    }

    pub fn with_space_multiplier(mut self, multiplier: f64) -> Self {
        self.space_multiplier = Some(multiplier);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
