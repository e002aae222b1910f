//! Status command: space, snapshots, and layout at a glance.

use std::path::Path;

use camvault_fs::Filesystem;
use camvault_runtime::Clock;
use camvault_snapshot::toc::format_rfc3339;
use camvault_snapshot::{SnapshotManager, SpaceManager};
use serde::Serialize;

use crate::coordinator::BackingPaths;

use super::CommandResult;

/// One registered snapshot, as shown by `camvault status`.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub id: u64,
    pub created_at: String,
    pub dir: String,
}

/// Everything `camvault status` reports.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub backing_dir: String,
    pub cam_disk_bytes: u64,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub snapshots: Vec<SnapshotInfo>,
    pub partials_reaped: usize,
}

impl StatusReport {
    /// Human-readable rendering for the non-JSON output path.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Backing volume: {}\n", self.backing_dir));
        out.push_str(&format!(
            "Space: {:.1} GiB free / {:.1} GiB total\n",
            self.free_bytes as f64 / (1u64 << 30) as f64,
            self.total_bytes as f64 / (1u64 << 30) as f64,
        ));
        out.push_str(&format!(
            "Cam disk: {:.1} GiB\n",
            self.cam_disk_bytes as f64 / (1u64 << 30) as f64
        ));
        out.push_str(&format!("Snapshots: {}\n", self.snapshots.len()));
        for snapshot in &self.snapshots {
            out.push_str(&format!(
                "  {:>6}  {}  {}\n",
                snapshot.id, snapshot.created_at, snapshot.dir
            ));
        }
        out
    }
}

/// Execute the status command.
///
/// Runs the recovery scan as a side effect, so partial directories from a
/// crash are reaped and reported.
pub fn execute_status<F: Filesystem + Clone, C: Clock>(
    backing_dir: &Path,
    fs: F,
    clock: C,
) -> CommandResult<StatusReport> {
    let paths = BackingPaths::new(backing_dir);

    let snapshots = SnapshotManager::new(
        fs.clone(),
        clock,
        paths.cam_disk.clone(),
        paths.snapshots_dir.clone(),
    );
    let load = snapshots.load()?;

    let cam_disk_bytes = if fs.exists(&paths.cam_disk) {
        fs.file_size(&paths.cam_disk)?
    } else {
        0
    };
    let space = SpaceManager::new(fs, paths.snapshots_dir, cam_disk_bytes);
    let info = space.space_info()?;

    Ok(StatusReport {
        backing_dir: backing_dir.display().to_string(),
        cam_disk_bytes,
        total_bytes: info.total_bytes,
        free_bytes: info.free_bytes,
        used_bytes: info.used_bytes,
        snapshots: load
            .snapshots
            .iter()
            .map(|s| SnapshotInfo {
                id: s.id,
                created_at: format_rfc3339(s.created_at),
                dir: s.dir.display().to_string(),
            })
            .collect(),
        partials_reaped: load.reaped.len(),
    })
}
