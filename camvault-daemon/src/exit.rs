//! Exit codes for the camvault CLI.
//!
//! Normal shutdown, including SIGINT, exits 0; non-zero codes are reserved
//! for failures a service manager should react to.

use camvault_fs::FsError;
use camvault_snapshot::{SnapshotError, SpaceError};

use crate::commands::CommandError;
use crate::coordinator::CoordinatorError;

/// Exit code constants.
pub mod codes {
    /// Successful execution or clean shutdown.
    pub const SUCCESS: i32 = 0;
    /// Invalid arguments.
    pub const INVALID_ARGS: i32 = 1;
    /// Configuration problem (bad knobs, missing cam disk).
    pub const CONFIG_ERROR: i32 = 2;
    /// Unexpected filesystem failure.
    pub const IO_ERROR: i32 = 3;
    /// Backing volume cannot take reflink snapshots.
    pub const UNSUPPORTED_FS: i32 = 4;
    /// Fatal archive failure (auth, missing tool) or failed one-shot cycle.
    pub const ARCHIVE_ERROR: i32 = 5;
    /// Space invariant cannot be satisfied.
    pub const NO_SPACE: i32 = 6;
}

/// Map a CommandError to an exit code.
pub fn exit_code(error: &CommandError) -> i32 {
    match error {
        CommandError::InvalidArgument(_) => codes::INVALID_ARGS,
        CommandError::Config(_) | CommandError::CamDiskMissing(_) => codes::CONFIG_ERROR,
        CommandError::Fs(FsError::Unsupported(_)) => codes::UNSUPPORTED_FS,
        CommandError::Fs(_) => codes::IO_ERROR,
        CommandError::Snapshot(SnapshotError::Fs(FsError::Unsupported(_))) => {
            codes::UNSUPPORTED_FS
        }
        CommandError::Snapshot(_) => codes::IO_ERROR,
        CommandError::Space(SpaceError::NoSpace { .. }) => codes::NO_SPACE,
        CommandError::Space(_) => codes::IO_ERROR,
        CommandError::Coordinator(CoordinatorError::FatalArchive(_)) => codes::ARCHIVE_ERROR,
        CommandError::Coordinator(CoordinatorError::Unsupported(_)) => codes::UNSUPPORTED_FS,
        CommandError::CycleFailed => codes::ARCHIVE_ERROR,
    }
}
