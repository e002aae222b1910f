//! Archive backend driving the `rclone` tool.
//!
//! rclone speaks to 40+ storage providers; camvault shells out to it rather
//! than linking provider SDKs. Every invocation runs with a polled timeout
//! so the coordinator thread can observe cancellation, and a cancelled or
//! timed-out child is killed and reaped before the call returns; an
//! orphaned copy can corrupt a partial upload.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use camvault_runtime::{ShutdownCheck, ShutdownFlag};

use crate::backend::{ArchiveBackend, BackendError};

const POLL_INTERVAL_MS: u64 = 100;
const PROBE_TIMEOUT_SECS: u64 = 30;
const SIZE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_COPY_TIMEOUT_SECS: u64 = 300;

/// Archive backend using rclone.
///
/// `remote` is a configured rclone remote name; `path` an optional prefix
/// within it. Configure rclone itself with `rclone config` beforehand.
#[derive(Debug, Clone)]
pub struct RcloneBackend {
    binary: String,
    remote: String,
    path: String,
    flags: Vec<String>,
    copy_timeout_secs: u64,
    cancel: Option<ShutdownFlag>,
}

impl RcloneBackend {
    pub fn new(remote: &str, path: &str, flags: Vec<String>) -> Self {
        Self {
            binary: "rclone".to_string(),
            remote: remote.to_string(),
            path: path.trim_matches('/').to_string(),
            flags,
            copy_timeout_secs: DEFAULT_COPY_TIMEOUT_SECS,
            cancel: None,
        }
    }

    /// Share the daemon's shutdown flag so in-flight transfers abort.
    pub fn with_cancel(mut self, cancel: ShutdownFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Override the per-file transfer timeout.
    pub fn with_copy_timeout_secs(mut self, secs: u64) -> Self {
        self.copy_timeout_secs = secs;
        self
    }

    /// Override the rclone binary name (tests).
    pub fn with_binary(mut self, binary: &str) -> Self {
        self.binary = binary.to_string();
        self
    }

    /// Build an `remote:path/rel` destination string.
    fn dest(&self, dst_relative: &str) -> String {
        match (self.path.is_empty(), dst_relative.is_empty()) {
            (false, false) => format!("{}:{}/{}", self.remote, self.path, dst_relative),
            (false, true) => format!("{}:{}", self.remote, self.path),
            (true, false) => format!("{}:{}", self.remote, dst_relative),
            (true, true) => format!("{}:", self.remote),
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.should_stop())
            .unwrap_or(false)
    }

    /// Run one rclone invocation with a polled timeout.
    ///
    /// Returns `(exit_ok, stdout)` or a classified error. The child is
    /// always reaped: killed on timeout and on cancellation.
    fn run(&self, args: &[&str], timeout_secs: u64) -> Result<(bool, String), BackendError> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                BackendError::Fatal(format!("cannot run {}: {e}", self.binary))
            })?;

        let polls = timeout_secs.saturating_mul(1000) / POLL_INTERVAL_MS;
        for _ in 0..polls {
            if self.cancelled() {
                kill_and_reap(&mut child);
                return Err(BackendError::Transient("cancelled by shutdown".to_string()));
            }
            match child.try_wait() {
                Ok(Some(status)) => {
                    let mut stdout = String::new();
                    if let Some(mut pipe) = child.stdout.take() {
                        let _ = pipe.read_to_string(&mut stdout);
                    }
                    return Ok((status.success(), stdout));
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS)),
                Err(e) => {
                    kill_and_reap(&mut child);
                    return Err(BackendError::Transient(format!("wait for rclone: {e}")));
                }
            }
        }

        kill_and_reap(&mut child);
        Err(BackendError::Transient(format!(
            "rclone timed out after {timeout_secs}s"
        )))
    }
}

fn kill_and_reap(child: &mut Child) {
    // kill is a no-op if the child already exited; wait reaps the zombie
    let _ = child.kill();
    let _ = child.wait();
}

impl ArchiveBackend for RcloneBackend {
    fn is_reachable(&self) -> bool {
        let root = self.dest("");
        matches!(
            self.run(&["lsf", &root, "--max-depth", "1"], PROBE_TIMEOUT_SECS),
            Ok((true, _))
        )
    }

    fn copy_file(&self, src: &Path, dst_relative: &Path) -> Result<(), BackendError> {
        let dest = self.dest(&dst_relative.to_string_lossy());
        let src = src.to_string_lossy().into_owned();
        let mut args = vec!["copyto", src.as_str(), dest.as_str()];
        args.extend(self.flags.iter().map(String::as_str));

        match self.run(&args, self.copy_timeout_secs)? {
            (true, _) => Ok(()),
            (false, _) => Err(BackendError::Transient(format!(
                "rclone copyto failed for {dest}"
            ))),
        }
    }

    fn remote_size(&self, dst_relative: &Path) -> Result<Option<u64>, BackendError> {
        let dest = self.dest(&dst_relative.to_string_lossy());

        match self.run(&["size", &dest, "--json"], SIZE_TIMEOUT_SECS)? {
            (true, stdout) => Ok(parse_size_json(&stdout)),
            // rclone size fails for absent paths; treat as not present
            (false, _) => Ok(None),
        }
    }
}

/// Extract the byte count from `rclone size --json` output.
fn parse_size_json(stdout: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(stdout).ok()?;
    value.get("bytes")?.as_u64()
}
