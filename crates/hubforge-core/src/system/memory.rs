//! Physical memory queries used as the default quantization budget.

use sysinfo::System;
use tracing::debug;

/// Total physical memory in bytes.
pub fn total_memory_bytes() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    let total = system.total_memory();
    debug!("System memory: {} bytes", total);
    total
}
