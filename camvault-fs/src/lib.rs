//! Filesystem port for camvault.
//!
//! This crate provides:
//! - `Filesystem` trait covering the narrow set of path operations the
//!   snapshot, space, and archive subsystems need
//! - `RealFilesystem` talking to the OS (atomic writes, directory fsync,
//!   reflink copies, statvfs space queries)
//! - `MockFilesystem` backing the test suite, with a settable space budget
//!   and per-operation fault injection

pub mod filesystem;
pub mod mock;

pub use filesystem::{Filesystem, FsError, RealFilesystem};
pub use mock::{MockFilesystem, MockOp};
