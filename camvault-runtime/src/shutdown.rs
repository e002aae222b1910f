//! Cooperative shutdown signalling.
//!
//! Every blocking point in camvault (reachability polling, idle waits, the
//! archive copy loop) checks a `ShutdownCheck` between steps. The production
//! `ShutdownFlag` is set from a SIGINT/SIGTERM handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Trait for checking whether shutdown has been requested.
pub trait ShutdownCheck: Send + Sync {
    /// Returns true once shutdown has been requested.
    fn should_stop(&self) -> bool;
}

/// Flag that tracks whether shutdown has been requested.
///
/// `new()` registers a Ctrl+C handler that sets the flag. Loops check
/// `should_stop()` between iterations; nothing is interrupted mid-operation.
#[derive(Debug, Clone)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownFlag {
    /// Create a new shutdown flag and register a SIGINT handler.
    ///
    /// Registration failure (e.g. a handler is already installed) is ignored;
    /// the returned flag can still be triggered programmatically.
    pub fn new() -> Self {
        let flag = Arc::new(AtomicBool::new(false));
        let handler_flag = flag.clone();

        let _ = ctrlc::set_handler(move || {
            handler_flag.store(true, Ordering::SeqCst);
        });

        Self { flag }
    }

    /// Create a flag with no signal handler, for manual control in tests.
    pub fn manual() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request shutdown.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clear the flag.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl ShutdownCheck for ShutdownFlag {
    fn should_stop(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Mock check that never signals shutdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverShutdown;

impl NeverShutdown {
    /// Create a new mock that never signals shutdown.
    pub fn new() -> Self {
        Self
    }
}

impl ShutdownCheck for NeverShutdown {
    fn should_stop(&self) -> bool {
        false
    }
}

/// Mock check that always signals shutdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysShutdown;

impl AlwaysShutdown {
    /// Create a new mock that always signals shutdown.
    pub fn new() -> Self {
        Self
    }
}

impl ShutdownCheck for AlwaysShutdown {
    fn should_stop(&self) -> bool {
        true
    }
}

/// Check that flips to "stop" after a fixed number of polls.
///
/// Lets tests run a loop for N iterations and then observe a clean exit.
#[derive(Debug)]
pub struct CountdownShutdown {
    remaining: std::sync::atomic::AtomicU64,
}

impl CountdownShutdown {
    /// Stop after `polls` calls to `should_stop` have returned false.
    pub fn after(polls: u64) -> Self {
        Self {
            remaining: std::sync::atomic::AtomicU64::new(polls),
        }
    }
}

impl ShutdownCheck for CountdownShutdown {
    fn should_stop(&self) -> bool {
        let prev = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap();
        prev == 0
    }
}
