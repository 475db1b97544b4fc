//! Progress throttling.
//!
//! Rate-limits progress updates so a fast transfer does not emit one event
//! per network packet.

use std::time::Duration;
use tokio::time::Instant;

/// Decides when a byte counter has moved enough to be worth reporting.
///
/// An update is due once `byte_threshold` bytes arrived since the last
/// emitted value, or once `min_interval` elapsed with any new bytes.
#[derive(Debug)]
pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    last_bytes: u64,
    byte_threshold: u64,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub fn new(byte_threshold: u64, min_interval: Duration) -> Self {
        Self {
            last_emit: None,
            last_bytes: 0,
            byte_threshold,
            min_interval,
        }
    }

    /// Check whether `bytes` should be emitted, recording it if so.
    pub fn should_emit(&mut self, bytes: u64) -> bool {
        let now = Instant::now();
        let due = match self.last_emit {
            None => true,
            Some(_) if bytes <= self.last_bytes => false,
            Some(_) if bytes - self.last_bytes >= self.byte_threshold => true,
            Some(last) => now.duration_since(last) >= self.min_interval,
        };
        if due {
            self.last_emit = Some(now);
            self.last_bytes = bytes;
        }
        due
    }

    /// Force the next check to return true.
    pub fn reset(&mut self) {
        self.last_emit = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_update_always_emits() {
        let mut throttle = ProgressThrottle::new(1024, Duration::from_millis(100));
        assert!(throttle.should_emit(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_byte_threshold() {
        let mut throttle = ProgressThrottle::new(1024, Duration::from_secs(60));
        assert!(throttle.should_emit(10));
        assert!(!throttle.should_emit(500));
        assert!(throttle.should_emit(1034));
        assert!(!throttle.should_emit(1034));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_with_new_bytes() {
        let mut throttle = ProgressThrottle::new(u64::MAX, Duration::from_millis(50));
        assert!(throttle.should_emit(1));
        assert!(!throttle.should_emit(2));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(throttle.should_emit(3));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(!throttle.should_emit(3), "no new bytes");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let mut throttle = ProgressThrottle::new(1024, Duration::from_secs(60));
        throttle.should_emit(1);
        assert!(!throttle.should_emit(1));
        throttle.reset();
        assert!(throttle.should_emit(1));
    }
}
