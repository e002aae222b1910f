//! Clean command: evict everything evictable.

use std::path::Path;

use camvault_fs::Filesystem;
use camvault_runtime::Clock;
use camvault_snapshot::SnapshotManager;

use crate::coordinator::BackingPaths;

use super::CommandResult;

/// Result of a clean run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanReport {
    /// Complete snapshots deleted.
    pub removed: u64,
    /// Partial directories reaped by the recovery scan.
    pub partials_reaped: usize,
}

/// Delete every unreferenced snapshot.
///
/// In a fresh process nothing holds a refcount, so this empties the
/// registry: the recovery scan reaps partials, then the sweep removes the
/// complete snapshots oldest-first.
pub fn execute_clean<F: Filesystem + Clone, C: Clock>(
    backing_dir: &Path,
    fs: F,
    clock: C,
) -> CommandResult<CleanReport> {
    let paths = BackingPaths::new(backing_dir);
    let snapshots = SnapshotManager::new(fs, clock, paths.cam_disk, paths.snapshots_dir);
    let load = snapshots.load()?;

    let mut removed = 0;
    while snapshots.delete_oldest_if_deletable()? {
        removed += 1;
    }

    Ok(CleanReport {
        removed,
        partials_reaped: load.reaped.len(),
    })
}
