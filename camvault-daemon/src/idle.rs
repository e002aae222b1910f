//! Idle detection: wait for the car to stop writing before a snapshot.
//!
//! The mass-storage gadget writes to the cam disk through a kernel
//! `file-storage` process whose I/O counters appear in `/proc/<pid>/io`.
//! Sampling `write_bytes` once per second gives a byte-rate signal; the
//! detector declares idle after a run of quiet samples.

use std::path::PathBuf;

use camvault_runtime::{ShutdownCheck, Sleeper};
use regex::Regex;

/// Bytes per second above which the car counts as actively writing.
pub const WRITE_THRESHOLD_BYTES: u64 = 500_000;

/// Quiet one-second samples required to confirm idle.
pub const IDLE_CONFIRM_SAMPLES: u32 = 5;

/// Name of the kernel mass-storage process to monitor.
pub const DEFAULT_STORAGE_PROCESS: &str = "file-storage";

/// Detection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    /// Waiting for a baseline sample.
    Undetermined,
    /// Writes above threshold observed.
    Writing,
    /// Quiet for the confirmation window.
    Idle,
}

/// Port for waiting until the vehicle is quiescent.
pub trait IdleDetector: Send {
    /// Wait up to `timeout_secs` for the car to become idle.
    ///
    /// Returns true once idle is confirmed; false on timeout or shutdown.
    fn wait_for_idle(&mut self, timeout_secs: u64) -> bool;
}

/// Extract the `write_bytes` counter from `/proc/<pid>/io` content.
pub fn parse_write_bytes(content: &str) -> Option<u64> {
    let re = Regex::new(r"write_bytes:\s*(\d+)").expect("static regex");
    re.captures(content)?.get(1)?.as_str().parse().ok()
}

/// Idle detector sampling `/proc/<pid>/io` of the mass-storage process.
pub struct ProcIdleDetector<S: Sleeper, H: ShutdownCheck> {
    proc_root: PathBuf,
    process_name: String,
    sleeper: S,
    shutdown: H,
    state: IdleState,
    prev_written: Option<u64>,
    burst_bytes: u64,
    quiet_samples: u32,
}

impl<S: Sleeper, H: ShutdownCheck> ProcIdleDetector<S, H> {
    /// Detector over the standard `/proc` for the default storage process.
    pub fn new(sleeper: S, shutdown: H) -> Self {
        Self::with_proc_root(PathBuf::from("/proc"), DEFAULT_STORAGE_PROCESS, sleeper, shutdown)
    }

    /// Detector over an arbitrary proc-style tree (testing).
    pub fn with_proc_root(
        proc_root: PathBuf,
        process_name: &str,
        sleeper: S,
        shutdown: H,
    ) -> Self {
        Self {
            proc_root,
            process_name: process_name.to_string(),
            sleeper,
            shutdown,
            state: IdleState::Undetermined,
            prev_written: None,
            burst_bytes: 0,
            quiet_samples: 0,
        }
    }

    /// Current detection state.
    pub fn state(&self) -> IdleState {
        self.state
    }

    fn find_pid(&self) -> Option<String> {
        let entries = std::fs::read_dir(&self.proc_root).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            let comm = entry.path().join("comm");
            if let Ok(content) = std::fs::read_to_string(&comm) {
                if content.trim() == self.process_name {
                    return Some(name);
                }
            }
        }
        None
    }

    fn sample_write_bytes(&self, pid: &str) -> Option<u64> {
        let io_path = self.proc_root.join(pid).join("io");
        std::fs::read_to_string(io_path)
            .ok()
            .and_then(|content| parse_write_bytes(&content))
    }
}

impl<S: Sleeper, H: ShutdownCheck> IdleDetector for ProcIdleDetector<S, H> {
    fn wait_for_idle(&mut self, timeout_secs: u64) -> bool {
        self.state = IdleState::Undetermined;
        self.prev_written = None;
        self.burst_bytes = 0;
        self.quiet_samples = 0;

        for _ in 0..timeout_secs {
            if self.shutdown.should_stop() {
                return false;
            }
            self.sleeper.sleep_sec(1);

            let Some(pid) = self.find_pid() else {
                // No mass-storage process: nothing can be writing.
                self.state = IdleState::Idle;
                return true;
            };
            let Some(written) = self.sample_write_bytes(&pid) else {
                continue;
            };

            let Some(prev) = self.prev_written else {
                self.prev_written = Some(written);
                continue;
            };
            let delta = written.saturating_sub(prev);
            self.prev_written = Some(written);

            if self.state == IdleState::Writing {
                if delta < WRITE_THRESHOLD_BYTES {
                    self.state = IdleState::Idle;
                    self.burst_bytes = 0;
                    self.quiet_samples = 0;
                } else {
                    self.burst_bytes += delta;
                }
            } else {
                // Undetermined and Idle share one rule: accumulate quiet
                // samples toward confirmation, or enter Writing on a burst.
                if delta > WRITE_THRESHOLD_BYTES {
                    self.state = IdleState::Writing;
                    self.burst_bytes = delta;
                    self.quiet_samples = 0;
                } else {
                    self.quiet_samples += 1;
                    if self.quiet_samples >= IDLE_CONFIRM_SAMPLES {
                        self.state = IdleState::Idle;
                        return true;
                    }
                }
            }
        }

        false
    }
}

/// Scripted idle detector for tests.
#[derive(Debug, Clone)]
pub struct MockIdleDetector {
    always_idle: bool,
    pub calls: u32,
}

impl MockIdleDetector {
    /// Detector that confirms idle immediately.
    pub fn idle() -> Self {
        Self {
            always_idle: true,
            calls: 0,
        }
    }

    /// Detector that always times out.
    pub fn never_idle() -> Self {
        Self {
            always_idle: false,
            calls: 0,
        }
    }
}

impl IdleDetector for MockIdleDetector {
    fn wait_for_idle(&mut self, _timeout_secs: u64) -> bool {
        self.calls += 1;
        self.always_idle
    }
}
