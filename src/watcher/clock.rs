//! Time Source
//!
//! The watcher never reads the system clock directly so ticks can be driven
//! deterministically in tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::types::unix_now;

/// Wall clock and sleeper used by the watcher loop
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current unix time in seconds
    fn now(&self) -> u64;

    /// Suspend until `duration` has elapsed
    async fn sleep(&self, duration: Duration);
}

/// Real time via `std::time` and `tokio::time`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> u64 {
        unix_now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Manually advanced clock; `sleep` moves time forward instead of waiting
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.now.fetch_add(duration.as_secs(), Ordering::SeqCst);
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new(1_000);
        clock.sleep(Duration::from_secs(30)).await;
        assert_eq!(clock.now(), 1_030);

        clock.set(5);
        clock.advance(Duration::from_millis(2_500));
        assert_eq!(clock.now(), 7);
    }

    #[test]
    fn test_system_clock_is_unix_time() {
        // 2020-01-01
        assert!(SystemClock.now() > 1_577_836_800);
    }
}
