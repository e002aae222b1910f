//! Sleep abstraction.
//!
//! The coordinator sleeps between reachability probes, settle delays, and
//! idle backoff. A `Sleeper` trait keeps those waits out of the test suite.

use std::time::Duration;

/// Trait for sleeping between loop iterations.
pub trait Sleeper: Send + Sync {
    /// Sleep for the specified number of seconds.
    fn sleep_sec(&self, seconds: u64);
}

/// Real sleeper backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealSleeper;

impl RealSleeper {
    /// Create a new real sleeper.
    pub fn new() -> Self {
        Self
    }
}

impl Sleeper for RealSleeper {
    fn sleep_sec(&self, seconds: u64) {
        std::thread::sleep(Duration::from_secs(seconds));
    }
}

/// Mock sleeper that records requested delays and returns immediately.
#[derive(Debug, Default, Clone)]
pub struct MockSleeper {
    slept: std::sync::Arc<std::sync::Mutex<Vec<u64>>>,
}

impl MockSleeper {
    /// Create a new mock sleeper.
    pub fn new() -> Self {
        Self::default()
    }

    /// All delays requested so far, in order.
    pub fn slept(&self) -> Vec<u64> {
        self.slept.lock().unwrap().clone()
    }

    /// Total seconds of sleep requested.
    pub fn total_sec(&self) -> u64 {
        self.slept.lock().unwrap().iter().sum()
    }
}

impl Sleeper for MockSleeper {
    fn sleep_sec(&self, seconds: u64) {
        self.slept.lock().unwrap().push(seconds);
    }
}
