//! Run command: the daemon loop.

use std::path::PathBuf;

use camvault_archive::{ArchiveBackend, ArchiveManager, ClipFlags, DEFAULT_MIN_CLIP_BYTES};
use camvault_fs::Filesystem;
use camvault_runtime::{Clock, ShutdownCheck, Sleeper};
use camvault_snapshot::{SnapshotManager, SpaceManager};

use crate::cli::RunArgs;
use crate::config::{ArchiveSystem, Config};
use crate::coordinator::{BackingPaths, Coordinator, CoordinatorConfig, RunSummary};
use crate::idle::IdleDetector;
use crate::logger::Logger;
use crate::mount::ImageMounter;

use super::{CommandError, CommandResult};

/// Everything the run and archive commands need, resolved from CLI flags
/// and configuration.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub backing_dir: PathBuf,
    pub coordinator: CoordinatorConfig,
    pub clip_flags: ClipFlags,
    pub min_clip_bytes: u64,
}

impl RunOptions {
    /// Validate flags and merge them with configuration.
    pub fn new(backing_dir: PathBuf, args: &RunArgs, config: &Config) -> CommandResult<Self> {
        args.validate()?;
        Ok(Self {
            backing_dir,
            coordinator: CoordinatorConfig {
                poll_interval_secs: args.poll_interval,
                max_backoff_secs: args.max_backoff,
                settle_delay_secs: config.settle_delay_secs,
                idle_timeout_secs: args.idle_timeout,
                archive_enabled: config.archive.system == ArchiveSystem::Rclone,
            },
            clip_flags: config.archive.clips,
            min_clip_bytes: args.min_clip_bytes.unwrap_or(DEFAULT_MIN_CLIP_BYTES),
        })
    }
}

/// Verify the backing volume is usable before the first cycle.
///
/// The cam disk must exist (created at provisioning time) and the volume
/// must support reflinks; without them every snapshot would be a full
/// copy, and the space invariant would not hold. Returns the cam disk
/// size, which doubles as the worst-case snapshot size.
pub fn preflight<F: Filesystem, L: Logger>(
    fs: &F,
    paths: &BackingPaths,
    logger: &L,
) -> CommandResult<u64> {
    if !fs.exists(&paths.cam_disk) {
        return Err(CommandError::CamDiskMissing(paths.cam_disk.clone()));
    }

    // Probe reflink support with a throwaway file pair
    let probe_src = paths.root.join(".reflink-probe");
    let probe_dst = paths.root.join(".reflink-probe-clone");
    let _ = fs.unlink_file(&probe_dst);
    fs.write_file_atomic(&probe_src, b"reflink probe")?;
    let probe = fs.reflink_copy(&probe_src, &probe_dst);
    let _ = fs.unlink_file(&probe_src);
    let _ = fs.unlink_file(&probe_dst);
    probe?;

    let cam_bytes = fs.file_size(&paths.cam_disk)?;
    let total_bytes = fs.total_bytes(&paths.root)?;
    if cam_bytes > total_bytes / 2 {
        // A diverged snapshot can occupy a full cam size; above half the
        // volume the COW budget cannot hold.
        logger.error(&format!(
            "cam disk ({cam_bytes} bytes) exceeds 50% of the backing volume \
             ({total_bytes} bytes); snapshot copy-on-write may exhaust space"
        ));
    }

    Ok(cam_bytes)
}

/// Build the coordinator over the given ports.
#[allow(clippy::too_many_arguments)]
pub fn build_coordinator<F, C, B, M, I, S, H, L>(
    options: &RunOptions,
    fs: F,
    clock: C,
    backend: B,
    mounter: M,
    idle: Option<I>,
    sleeper: S,
    shutdown: H,
    logger: L,
) -> CommandResult<Coordinator<F, C, B, M, I, S, H, L>>
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
    let paths = BackingPaths::new(&options.backing_dir);
    let cam_bytes = preflight(&fs, &paths, &logger)?;

    let snapshots = SnapshotManager::new(
        fs.clone(),
        clock,
        paths.cam_disk.clone(),
        paths.snapshots_dir.clone(),
    );
    let report = snapshots.load()?;
    logger.info(&format!(
        "loaded {} snapshots ({} partial directories reaped)",
        report.snapshots.len(),
        report.reaped.len()
    ));

    let space = SpaceManager::new(fs.clone(), paths.snapshots_dir.clone(), cam_bytes);
    let archiver = ArchiveManager::new(fs, backend, options.clip_flags)
        .with_min_clip_bytes(options.min_clip_bytes);

    Ok(Coordinator::new(
        snapshots,
        space,
        archiver,
        mounter,
        idle,
        sleeper,
        shutdown,
        logger,
        options.coordinator,
    ))
}

/// Execute the run command: preflight, recover, loop until shutdown.
#[allow(clippy::too_many_arguments)]
pub fn execute_run<F, C, B, M, I, S, H, L>(
    options: &RunOptions,
    fs: F,
    clock: C,
    backend: B,
    mounter: M,
    idle: Option<I>,
    sleeper: S,
    shutdown: H,
    logger: L,
) -> CommandResult<RunSummary>
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
    Ok(coordinator.run()?)
}
