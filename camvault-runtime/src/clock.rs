//! Time source for snapshot timestamps.
//!
//! The only consumer of wall-clock time in camvault is the snapshot
//! registry: every `.toc` marker records when its snapshot was taken, and
//! the recovery scan stamps reconstructed records. The `Clock` port keeps
//! those timestamps deterministic under test, where consecutive snapshots
//! need distinct creation times without real waiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Trait for reading the current time as Unix seconds.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now_unix_sec(&self) -> u64;
}

/// Wall-clock implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_sec(&self) -> u64 {
        // A host clock set before the epoch reads as the epoch; a marker
        // stamped 1970 is still a valid marker.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

/// Settable clock for tests.
///
/// Starts pinned at a fixed timestamp; tests move it with `advance` or
/// `set` so snapshots created back-to-back carry distinct creation times.
/// Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct MockClock {
    now: Arc<AtomicU64>,
}

impl MockClock {
    /// Create a clock pinned at `timestamp`.
    pub fn new(timestamp: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(timestamp)),
        }
    }

    /// Jump to an absolute timestamp.
    pub fn set(&self, timestamp: u64) {
        self.now.store(timestamp, Ordering::SeqCst);
    }

    /// Move time forward by `seconds`.
    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_unix_sec(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
