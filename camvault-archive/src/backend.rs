//! The archive backend contract.
//!
//! A backend names a destination and knows three things: whether it is
//! reachable, how to copy one file to a relative destination path, and the
//! size of a file already at the destination (for skip-if-present).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Backend failures, classified for loop control.
///
/// `Transient` failures re-enter the coordinator loop on the next cycle;
/// `Fatal` failures (missing tool, broken configuration, auth) terminate
/// the daemon.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("fatal backend failure: {0}")]
    Fatal(String),
}

impl BackendError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackendError::Fatal(_))
    }
}

/// Contract for pushing a snapshot's clips to a destination.
pub trait ArchiveBackend: Send + Sync {
    /// Cheap probe of the destination. Never blocks unboundedly.
    fn is_reachable(&self) -> bool;

    /// Copy one file to `dst_relative` under the destination root.
    fn copy_file(&self, src: &Path, dst_relative: &Path) -> Result<(), BackendError>;

    /// Size of the file at `dst_relative`, or `None` if absent.
    fn remote_size(&self, dst_relative: &Path) -> Result<Option<u64>, BackendError>;
}

/// In-memory backend for tests.
///
/// Records copied files and can be scripted to be unreachable or to fail
/// specific destination paths.
#[derive(Debug, Clone, Default)]
pub struct MockArchiveBackend {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    reachable: bool,
    copied: Vec<(PathBuf, PathBuf)>,
    remote: HashMap<PathBuf, u64>,
    fail_paths: HashMap<PathBuf, bool>,
    fatal_next: Option<String>,
}

impl MockArchiveBackend {
    /// A reachable backend with an empty destination.
    pub fn new() -> Self {
        let backend = Self::default();
        backend.set_reachable(true);
        backend
    }

    /// A backend that reports the destination unreachable.
    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().reachable = reachable;
    }

    /// Pretend `dst_relative` already exists at the destination with `size`.
    pub fn set_remote_file(&self, dst_relative: impl Into<PathBuf>, size: u64) {
        self.state
            .lock()
            .unwrap()
            .remote
            .insert(dst_relative.into(), size);
    }

    /// Make copies to `dst_relative` fail. `fatal` selects the error class.
    pub fn fail_path(&self, dst_relative: impl Into<PathBuf>, fatal: bool) {
        self.state
            .lock()
            .unwrap()
            .fail_paths
            .insert(dst_relative.into(), fatal);
    }

    /// Make the next copy fail fatally with `message`.
    pub fn fail_next_fatal(&self, message: &str) {
        self.state.lock().unwrap().fatal_next = Some(message.to_string());
    }

    /// Source/destination pairs copied so far, in order.
    pub fn copied(&self) -> Vec<(PathBuf, PathBuf)> {
        self.state.lock().unwrap().copied.clone()
    }

    /// Number of files copied so far.
    pub fn copied_count(&self) -> usize {
        self.state.lock().unwrap().copied.len()
    }
}

impl ArchiveBackend for MockArchiveBackend {
    fn is_reachable(&self) -> bool {
        self.state.lock().unwrap().reachable
    }

    fn copy_file(&self, src: &Path, dst_relative: &Path) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.fatal_next.take() {
            return Err(BackendError::Fatal(message));
        }
        match state.fail_paths.get(dst_relative) {
            Some(true) => {
                return Err(BackendError::Fatal(format!(
                    "scripted fatal failure for {}",
                    dst_relative.display()
                )))
            }
            Some(false) => {
                return Err(BackendError::Transient(format!(
                    "scripted transient failure for {}",
                    dst_relative.display()
                )))
            }
            None => {}
        }
        state
            .copied
            .push((src.to_path_buf(), dst_relative.to_path_buf()));
        state.remote.insert(dst_relative.to_path_buf(), 0);
        Ok(())
    }

    fn remote_size(&self, dst_relative: &Path) -> Result<Option<u64>, BackendError> {
        Ok(self.state.lock().unwrap().remote.get(dst_relative).copied())
    }
}
