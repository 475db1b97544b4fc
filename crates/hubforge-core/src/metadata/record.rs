use crate::backend::Backend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// A finalized model in the local store.
///
/// Persisted as `model_record.json` inside the model directory. The storage
/// path is not persisted; it is filled in from wherever the record was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: Uuid,
    /// Repository id the model was downloaded from.
    pub name: String,
    pub backend: Backend,
    #[serde(skip)]
    pub storage_path: PathBuf,
    pub total_size_bytes: u64,
    pub finalized_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Metadata keys written by the engine.
pub mod keys {
    pub const REVISION: &str = "revision";
    pub const QUANTIZATION: &str = "quantization";
    pub const FILE_COUNT: &str = "file_count";
    /// Set on records rebuilt from a directory without a readable record.
    pub const RECOVERED: &str = "recovered";
}
