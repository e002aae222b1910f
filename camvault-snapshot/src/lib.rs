//! Snapshot lifecycle and space management for camvault.
//!
//! This crate provides:
//! - `SnapshotManager`: the authoritative registry of on-disk snapshots,
//!   with refcounted acquisition, crash-safe create/delete ordering, and a
//!   recovery scan
//! - `SnapshotHandle`: RAII acquisition that releases on every exit path
//! - `TocRecord`: the body of the `.toc` completion marker
//! - `compute_layout` and `SpaceManager`: sizing and the "next snapshot
//!   always fits" invariant
//!
//! Crash-safety rests on two ordering rules. Creation writes data first and
//! renames the `.toc` marker last; deletion unlinks the marker first and
//! removes data afterwards. Marker presence is therefore the single oracle
//! for snapshot validity, and the recovery scan can unconditionally reap any
//! directory without one.

pub mod manager;
pub mod space;
pub mod toc;

pub use manager::{
    parse_snapshot_dir_name, snapshot_dir_name, LoadReport, Snapshot, SnapshotError,
    SnapshotHandle, SnapshotManager, SnapshotState, SNAPSHOT_IMAGE_NAME, SNAPSHOT_TOC_NAME,
};
pub use space::{compute_layout, DiskLayout, SpaceError, SpaceInfo, SpaceManager, GIB, MIB};
pub use toc::TocRecord;
