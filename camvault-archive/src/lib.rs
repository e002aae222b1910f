//! Archive port and clip copier for camvault.
//!
//! This crate provides:
//! - `ArchiveBackend`: the narrow contract for pushing files to a
//!   destination, with failures split into transient and fatal
//! - `ArchiveManager`: scans a mounted snapshot's clip roots and performs
//!   idempotent copy-if-changed transfers, honouring cancellation between
//!   files
//! - `RcloneBackend`: drives the `rclone` tool as a child process

pub mod backend;
pub mod manager;
pub mod rclone;

pub use backend::{ArchiveBackend, BackendError, MockArchiveBackend};
pub use manager::{ArchiveError, ArchiveManager, ArchiveReport, ClipFlags, DEFAULT_MIN_CLIP_BYTES};
pub use rclone::RcloneBackend;
