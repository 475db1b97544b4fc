//! Metadata persistence.
//!
//! This module provides:
//! - Atomic JSON file operations
//! - The on-disk [`ModelRecord`] written alongside every finalized model

mod atomic;
mod record;

pub use atomic::{atomic_read_json, atomic_write_json};
pub use record::{keys, ModelRecord};
