//! Archive command: one cycle, then exit.

use camvault_archive::ArchiveBackend;
use camvault_fs::Filesystem;
use camvault_runtime::{Clock, ShutdownCheck, Sleeper};

use crate::coordinator::CycleOutcome;
use crate::idle::IdleDetector;
use crate::logger::Logger;
use crate::mount::ImageMounter;

use super::run::{build_coordinator, RunOptions};
use super::{CommandError, CommandResult};

/// Execute a single archive cycle.
///
/// A recoverable cycle failure (unreachable destination, failed transfers)
/// is an error here, unlike in the daemon loop: a one-shot invocation has
/// no next cycle to retry in.
#[allow(clippy::too_many_arguments)]
pub fn execute_archive<F, C, B, M, I, S, H, L>(
    options: &RunOptions,
    fs: F,
    clock: C,
    backend: B,
    mounter: M,
    idle: Option<I>,
    sleeper: S,
    shutdown: H,
    logger: L,
) -> CommandResult<CycleOutcome>
where
    F: Filesystem + Clone,
    C: Clock,
    B: ArchiveBackend,
    M: ImageMounter,
    I: IdleDetector,
    S: Sleeper,
    H: ShutdownCheck,
    L: Logger + Clone,
{
    let mut coordinator = build_coordinator(
        options, fs, clock, backend, mounter, idle, sleeper, shutdown, logger,
    )?;
    match coordinator.run_once()? {
        CycleOutcome::Failed => Err(CommandError::CycleFailed),
        outcome => Ok(outcome),
    }
}
