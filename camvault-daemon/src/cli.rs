//! CLI argument parsing for camvault.
//!
//! The binary has four subcommands: `run` (the daemon loop), `archive`
//! (one cycle), `status`, and `clean`. Knobs that describe the deployment
//! (reserve size, archive backend, clip selection) come from the
//! environment or a config file; the flags here are operational.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use thiserror::Error;

/// Default mount point of the backing volume.
pub const DEFAULT_BACKING_DIR: &str = "/backingfiles";

/// Default seconds between archive reachability probes.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default cap for reachability and idle-cycle backoff.
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 300;

/// Default seconds to wait for the car to stop writing.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 90;

/// Errors from CLI argument validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("poll-interval must be at least 1 second, got {0}")]
    InvalidPollInterval(u64),

    #[error("max-backoff ({max}) must be at least poll-interval ({poll})")]
    InvalidMaxBackoff { max: u64, poll: u64 },

    #[error("idle-timeout must be at least 1 second, got {0}")]
    InvalidIdleTimeout(u64),
}

/// Camvault - present a cam disk to the car over USB and archive its
/// footage to a cloud backend via crash-safe snapshots.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "camvault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Backing volume mount point (holds cam_disk.bin and snapshots/).
    #[arg(short = 'b', long, global = true, default_value = DEFAULT_BACKING_DIR)]
    pub backing_dir: PathBuf,

    /// Shell-style config file loaded over the environment.
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v verbose, -vv debug).
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the main coordinator loop.
    Run(RunArgs),
    /// Run a single archive cycle and exit.
    Archive(RunArgs),
    /// Show space, snapshot, and configuration status.
    Status(StatusArgs),
    /// Delete all unreferenced snapshots.
    Clean,
}

/// Arguments for the run and archive commands.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
pub struct RunArgs {
    /// Seconds between archive reachability probes.
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval: u64,

    /// Cap in seconds for reachability and idle-cycle backoff.
    #[arg(long, default_value_t = DEFAULT_MAX_BACKOFF_SECS)]
    pub max_backoff: u64,

    /// Seconds to wait for the car to stop writing before a snapshot.
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    pub idle_timeout: u64,

    /// Skip clips smaller than this many bytes (incomplete recordings).
    #[arg(long)]
    pub min_clip_bytes: Option<u64>,
}

impl RunArgs {
    /// Validate the arguments.
    pub fn validate(&self) -> Result<(), CliError> {
        if self.poll_interval == 0 {
            return Err(CliError::InvalidPollInterval(self.poll_interval));
        }
        if self.max_backoff < self.poll_interval {
            return Err(CliError::InvalidMaxBackoff {
                max: self.max_backoff,
                poll: self.poll_interval,
            });
        }
        if self.idle_timeout == 0 {
            return Err(CliError::InvalidIdleTimeout(self.idle_timeout));
        }
        Ok(())
    }
}

/// Arguments for the status command.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
pub struct StatusArgs {
    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Parse CLI arguments from an iterator of strings (testing).
pub fn parse_from<I, T>(iter: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(iter)
}
