//! Layout sizing and the "next snapshot fits" invariant.
//!
//! The layout derives from a single knob: `reserve`, the bytes withheld for
//! the host OS. The cam disk gets half of the usable XFS volume; the other
//! half is the snapshot budget. In the worst case every block of a reflink
//! copy diverges, so a snapshot can grow to the full cam size, and at most
//! one live snapshot can coexist with the live cam disk. Eager eviction of
//! unreferenced snapshots before each cycle keeps that budget free.

use std::path::PathBuf;

use camvault_fs::{Filesystem, FsError};
use camvault_runtime::Clock;
use thiserror::Error;

use crate::manager::{SnapshotError, SnapshotManager};

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

/// Fraction of the backing volume reserved for XFS metadata.
/// Measured ~2% in practice; 3% leaves headroom.
pub const XFS_OVERHEAD_PROPORTION: f64 = 0.03;

/// Smallest cam disk worth exporting to the vehicle.
pub const MIN_CAM_BYTES: u64 = GIB;

/// Errors from space management.
#[derive(Debug, Error)]
pub enum SpaceError {
    #[error("cannot reclaim enough space: {free_bytes} bytes free, {needed_bytes} needed")]
    NoSpace { free_bytes: u64, needed_bytes: u64 },

    #[error(
        "layout too small: {available_bytes} bytes available minus {reserve_bytes} reserve \
         leaves a {cam_bytes}-byte cam disk (minimum {MIN_CAM_BYTES})"
    )]
    LayoutTooSmall {
        available_bytes: u64,
        reserve_bytes: u64,
        cam_bytes: u64,
    },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Sizes derived from the host's available bytes and the reserve knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskLayout {
    /// Size of the sparse backing image hosting the XFS volume.
    pub backing_image_bytes: u64,
    /// Size of `cam_disk.bin` inside it.
    pub cam_bytes: u64,
}

/// Derive the storage layout from one user knob.
///
/// `cam_bytes` is half the usable volume, aligned down to a MiB boundary so
/// the FAT32 image size never strands a partial block at the loop device.
pub fn compute_layout(available_host_bytes: u64, reserve_bytes: u64) -> Result<DiskLayout, SpaceError> {
    let too_small = |cam_bytes| SpaceError::LayoutTooSmall {
        available_bytes: available_host_bytes,
        reserve_bytes,
        cam_bytes,
    };

    let backing_image_bytes = available_host_bytes
        .checked_sub(reserve_bytes)
        .ok_or_else(|| too_small(0))?;
    let overhead = (backing_image_bytes as f64 * XFS_OVERHEAD_PROPORTION) as u64;
    let usable = backing_image_bytes.saturating_sub(overhead);
    let cam_bytes = (usable / 2) / MIB * MIB;

    if cam_bytes < MIN_CAM_BYTES {
        return Err(too_small(cam_bytes));
    }

    Ok(DiskLayout {
        backing_image_bytes,
        cam_bytes,
    })
}

/// Disk space usage of the backing volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
}

impl SpaceInfo {
    pub fn free_gib(&self) -> f64 {
        self.free_bytes as f64 / GIB as f64
    }

    pub fn total_gib(&self) -> f64 {
        self.total_bytes as f64 / GIB as f64
    }
}

impl std::fmt::Display for SpaceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.1} GiB free / {:.1} GiB total",
            self.free_gib(),
            self.total_gib()
        )
    }
}

/// Enforces the invariant that a new snapshot always fits.
pub struct SpaceManager<F: Filesystem> {
    fs: F,
    snapshots_dir: PathBuf,
    cam_bytes: u64,
}

impl<F: Filesystem> SpaceManager<F> {
    /// A space manager for the volume containing `snapshots_dir`, where a
    /// worst-case snapshot occupies `cam_bytes`.
    pub fn new(fs: F, snapshots_dir: PathBuf, cam_bytes: u64) -> Self {
        Self {
            fs,
            snapshots_dir,
            cam_bytes,
        }
    }

    /// Worst-case size of one snapshot (the cam disk size).
    pub fn cam_bytes(&self) -> u64 {
        self.cam_bytes
    }

    /// Current usage of the backing volume.
    pub fn space_info(&self) -> Result<SpaceInfo, FsError> {
        let total_bytes = self.fs.total_bytes(&self.snapshots_dir)?;
        let free_bytes = self.fs.free_bytes(&self.snapshots_dir)?;
        Ok(SpaceInfo {
            total_bytes,
            free_bytes,
            used_bytes: total_bytes.saturating_sub(free_bytes),
        })
    }

    /// Evict oldest unreferenced snapshots until a full snapshot fits.
    ///
    /// Re-queries free space after every eviction. Returns the number of
    /// snapshots evicted, or `NoSpace` when every remaining snapshot is in
    /// use and free space is still short. Under normal coordinator flow the
    /// pre-cycle sweep has already emptied the registry and the first free
    /// check passes immediately.
    pub fn ensure_space_for_snapshot<C: Clock>(
        &self,
        snapshots: &SnapshotManager<F, C>,
    ) -> Result<u64, SpaceError> {
        let mut evicted = 0;
        loop {
            let free_bytes = self.fs.free_bytes(&self.snapshots_dir)?;
            if free_bytes >= self.cam_bytes {
                return Ok(evicted);
            }
            if !snapshots.delete_oldest_if_deletable()? {
                return Err(SpaceError::NoSpace {
                    free_bytes,
                    needed_bytes: self.cam_bytes,
                });
            }
            evicted += 1;
        }
    }
}

impl<F: Filesystem> std::fmt::Debug for SpaceManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceManager")
            .field("snapshots_dir", &self.snapshots_dir)
            .field("cam_bytes", &self.cam_bytes)
            .finish()
    }
}
