//! Clip scanning and the copy loop.
//!
//! The manager reads only from a mounted snapshot view, never the live cam
//! disk. Copies are idempotent: a file whose remote size already matches is
//! skipped, so a cycle interrupted at 99% costs one re-scan, not a re-upload.

use std::path::{Path, PathBuf};

use camvault_fs::Filesystem;
use camvault_runtime::ShutdownCheck;
use thiserror::Error;

use crate::backend::{ArchiveBackend, BackendError};

/// Files smaller than this are skipped as incomplete recordings.
pub const DEFAULT_MIN_CLIP_BYTES: u64 = 100_000;

const CLIP_EXTENSION: &str = "mp4";

/// Archive cycle failures, as seen by the coordinator.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("recoverable archive failure: {0}")]
    Recoverable(String),

    #[error("fatal archive failure: {0}")]
    Fatal(String),
}

impl From<BackendError> for ArchiveError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Transient(msg) => ArchiveError::Recoverable(msg),
            BackendError::Fatal(msg) => ArchiveError::Fatal(msg),
        }
    }
}

/// Which clip roots to archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipFlags {
    pub saved: bool,
    pub sentry: bool,
    pub recent: bool,
    pub track: bool,
}

impl Default for ClipFlags {
    fn default() -> Self {
        // RecentClips is a rolling buffer the car overwrites constantly;
        // archiving it is opt-in.
        Self {
            saved: true,
            sentry: true,
            recent: false,
            track: true,
        }
    }
}

impl ClipFlags {
    /// (source subdirectory, destination prefix) pairs, in scan order.
    fn roots(&self) -> Vec<(PathBuf, &'static str)> {
        let mut roots = Vec::new();
        if self.saved {
            roots.push((PathBuf::from("TeslaCam/SavedClips"), "SavedClips"));
        }
        if self.sentry {
            roots.push((PathBuf::from("TeslaCam/SentryClips"), "SentryClips"));
        }
        if self.recent {
            roots.push((PathBuf::from("TeslaCam/RecentClips"), "RecentClips"));
        }
        if self.track {
            roots.push((PathBuf::from("TeslaTrackMode"), "TrackMode"));
        }
        roots
    }
}

/// Accounting for one archive cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Candidate files discovered under the enabled roots.
    pub files_total: usize,
    /// Files copied to the destination.
    pub files_copied: usize,
    /// Files skipped because the destination already had them.
    pub files_skipped: usize,
    /// Files whose copy failed transiently.
    pub files_failed: usize,
    /// Bytes copied.
    pub bytes_copied: u64,
    /// True when the cycle stopped early on the shutdown signal.
    pub interrupted: bool,
}

struct Candidate {
    src: PathBuf,
    dst_relative: PathBuf,
    size: u64,
}

/// Scans a mounted snapshot and copies new clips to the backend.
pub struct ArchiveManager<F: Filesystem, B: ArchiveBackend> {
    fs: F,
    backend: B,
    flags: ClipFlags,
    min_clip_bytes: u64,
}

impl<F: Filesystem, B: ArchiveBackend> ArchiveManager<F, B> {
    pub fn new(fs: F, backend: B, flags: ClipFlags) -> Self {
        Self {
            fs,
            backend,
            flags,
            min_clip_bytes: DEFAULT_MIN_CLIP_BYTES,
        }
    }

    /// Override the incomplete-recording size threshold.
    pub fn with_min_clip_bytes(mut self, min_clip_bytes: u64) -> Self {
        self.min_clip_bytes = min_clip_bytes;
        self
    }

    /// The backend, for reachability probes.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn find_candidates(&self, mount: &Path) -> Result<Vec<Candidate>, ArchiveError> {
        let mut candidates = Vec::new();

        for (subdir, dst_prefix) in self.flags.roots() {
            let root = mount.join(&subdir);
            if !self.fs.exists(&root) {
                continue;
            }
            let files = self
                .fs
                .walk_files(&root)
                .map_err(|e| ArchiveError::Recoverable(format!("scan {}: {e}", root.display())))?;

            for src in files {
                let is_clip = src
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case(CLIP_EXTENSION))
                    .unwrap_or(false);
                if !is_clip {
                    continue;
                }
                let size = match self.fs.file_size(&src) {
                    Ok(size) => size,
                    Err(_) => continue,
                };
                if size < self.min_clip_bytes {
                    continue;
                }
                let rel = src.strip_prefix(&root).expect("walk stays under root");
                candidates.push(Candidate {
                    dst_relative: Path::new(dst_prefix).join(rel),
                    src,
                    size,
                });
            }
        }

        candidates.sort_by(|a, b| a.dst_relative.cmp(&b.dst_relative));
        Ok(candidates)
    }

    /// Copy every new clip from the mounted snapshot at `mount`.
    ///
    /// Checks `shutdown` between files; an interrupted cycle returns a
    /// report with `interrupted = true` rather than an error. Transient
    /// per-file failures are counted and, if any remain at the end, the
    /// whole cycle is `Recoverable` so the next cycle retries. A fatal
    /// backend failure aborts immediately.
    pub fn archive_clips<H: ShutdownCheck>(
        &self,
        mount: &Path,
        shutdown: &H,
    ) -> Result<ArchiveReport, ArchiveError> {
        let candidates = self.find_candidates(mount)?;
        let mut report = ArchiveReport {
            files_total: candidates.len(),
            ..ArchiveReport::default()
        };

        for candidate in candidates {
            if shutdown.should_stop() {
                report.interrupted = true;
                return Ok(report);
            }

            match self.backend.remote_size(&candidate.dst_relative) {
                Ok(Some(size)) if size == candidate.size => {
                    report.files_skipped += 1;
                    continue;
                }
                Ok(_) => {}
                Err(BackendError::Fatal(msg)) => return Err(ArchiveError::Fatal(msg)),
                Err(BackendError::Transient(_)) => {
                    // Unknown remote state: copy anyway, the backend
                    // overwrites idempotently.
                }
            }

            match self.backend.copy_file(&candidate.src, &candidate.dst_relative) {
                Ok(()) => {
                    report.files_copied += 1;
                    report.bytes_copied += candidate.size;
                }
                Err(BackendError::Transient(_)) => {
                    report.files_failed += 1;
                }
                Err(BackendError::Fatal(msg)) => return Err(ArchiveError::Fatal(msg)),
            }
        }

        if report.files_failed > 0 {
            return Err(ArchiveError::Recoverable(format!(
                "{} of {} clip transfers failed",
                report.files_failed, report.files_total
            )));
        }
        Ok(report)
    }
}
