//! Network resilience utilities.
//!
//! - Retry decisions with exponential backoff and jitter
//! - Progress event throttling

mod retry;
mod throttle;

pub use retry::{retry_async, RetryDecision, RetryPolicy};
pub use throttle::ProgressThrottle;
