//! Camvault daemon library.
//!
//! This crate wires the snapshot, space, and archive subsystems into the
//! coordinator loop and exposes the `camvault` CLI: argument parsing,
//! configuration, the idle detector and image mounter collaborator ports,
//! logging, exit codes, and command orchestration.

pub mod cli;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod exit;
pub mod idle;
pub mod logger;
pub mod mount;

pub use cli::{parse_from, Cli, CliError, Command, RunArgs, StatusArgs};
pub use commands::{
    execute_archive, execute_clean, execute_run, execute_status, CommandError, CommandResult,
};
pub use config::{Config, ConfigError};
pub use coordinator::{
    Coordinator, CoordinatorConfig, CoordinatorError, CoordinatorState, CycleOutcome, RunSummary,
};
pub use idle::{IdleDetector, MockIdleDetector, ProcIdleDetector};
pub use logger::{Logger, MockLogger, NullLogger, StderrLogger, Verbosity};
pub use mount::{ImageMounter, LoopMounter, MockMounter, MountError, MountedImage};
