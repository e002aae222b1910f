//! Command orchestration for the CLI subcommands.
//!
//! Provides execute functions for `run`, `archive`, `status`, and `clean`,
//! all generic over the ports so the test suite drives them with mocks.

pub mod archive;
pub mod clean;
pub mod run;
pub mod status;

pub use archive::execute_archive;
pub use clean::{execute_clean, CleanReport};
pub use run::{execute_run, RunOptions};
pub use status::{execute_status, SnapshotInfo, StatusReport};

use std::path::PathBuf;

use camvault_fs::FsError;
use camvault_snapshot::{SnapshotError, SpaceError};
use thiserror::Error;

use crate::cli::CliError;
use crate::config::ConfigError;
use crate::coordinator::CoordinatorError;

/// Errors from command execution.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] CliError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cam disk not found: {0} (is the backing volume mounted?)")]
    CamDiskMissing(PathBuf),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Space(#[from] SpaceError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("archive cycle failed")]
    CycleFailed,
}

/// Result of command execution.
pub type CommandResult<T> = Result<T, CommandError>;
