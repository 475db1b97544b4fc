//! System resource queries.

mod memory;

pub use memory::total_memory_bytes;
