//! The outer coordinator loop.
//!
//! One cycle: await reachability, await idleness, sweep unreferenced
//! snapshots, open a snapshot session, archive from a read-only mount of
//! the snapshot image, then delete the snapshot. A recoverable archive
//! failure releases the session without deleting; the next cycle's sweep
//! reclaims the orphan, which together with the half-volume layout keeps
//! space bounded. Every blocking point checks the shutdown flag.

use std::path::PathBuf;

use camvault_archive::{ArchiveBackend, ArchiveError, ArchiveManager, ArchiveReport};
use camvault_fs::{Filesystem, FsError};
use camvault_runtime::{Clock, ShutdownCheck, Sleeper};
use camvault_snapshot::{SnapshotError, SnapshotManager, SpaceError, SpaceManager};
use thiserror::Error;

use crate::idle::IdleDetector;
use crate::logger::Logger;
use crate::mount::ImageMounter;

/// Seconds to wait after a failed cycle before retrying.
const ERROR_RETRY_SECS: u64 = 30;

/// Errors that terminate the coordinator.
///
/// Everything else is a cycle error: logged, counted, retried next cycle.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("fatal archive failure: {0}")]
    FatalArchive(String),

    #[error("filesystem cannot take snapshots: {0}")]
    Unsupported(String),
}

/// Coordinator states, in loop order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Waiting for the archive destination to become reachable.
    Idle,
    /// Waiting for the car to stop writing.
    AwaitIdle,
    /// Evicting unreferenced snapshots.
    Sweep,
    /// Creating the snapshot.
    Snapshot,
    /// Uploading from the snapshot mount.
    Archive,
    /// Deleting the archived snapshot.
    Delete,
    /// Shutting down.
    Exiting,
}

/// Outcome of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Archive completed; snapshot deleted.
    Archived(ArchiveReport),
    /// Archiving disabled; only the sweep ran.
    SweepOnly,
    /// Cycle failed recoverably; retried next cycle.
    Failed,
    /// Shutdown observed mid-cycle.
    Interrupted,
}

/// Counters reported when the loop exits.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub archived_cycles: u64,
    pub failed_cycles: u64,
    pub files_copied: u64,
    pub files_skipped: u64,
}

/// Coordinator configuration.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Seconds between reachability probes and successful cycles.
    pub poll_interval_secs: u64,
    /// Cap for reachability and idle-cycle backoff.
    pub max_backoff_secs: u64,
    /// Settle delay when no idle detector is configured.
    pub settle_delay_secs: u64,
    /// How long to wait for the car to go idle.
    pub idle_timeout_secs: u64,
    /// False disables snapshot/archive; the loop still sweeps.
    pub archive_enabled: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            max_backoff_secs: 300,
            settle_delay_secs: 20,
            idle_timeout_secs: 90,
            archive_enabled: true,
        }
    }
}

/// Exponentially increasing intervals: base, 2*base, ..., capped.
#[derive(Debug, Clone)]
pub struct BackoffIntervals {
    base: u64,
    max: u64,
    current: u64,
}

impl BackoffIntervals {
    pub fn new(base: u64, max: u64) -> Self {
        let base = base.max(1);
        Self {
            base,
            max,
            current: base.min(max),
        }
    }

    /// The next interval; doubles until the cap.
    pub fn next_interval(&mut self) -> u64 {
        let interval = self.current;
        self.current = (self.current * 2).min(self.max);
        interval
    }

    /// Back to the base interval.
    pub fn reset(&mut self) {
        self.current = self.base.min(self.max);
    }
}

/// The outer state machine binding snapshots, space, and archive.
pub struct Coordinator<F, C, B, M, I, S, H, L>
where
    F: Filesystem,
    C: Clock,
    B: ArchiveBackend,
    M: ImageMounter,
    I: IdleDetector,
    S: Sleeper,
    H: ShutdownCheck,
    L: Logger,
{
    snapshots: SnapshotManager<F, C>,
    space: SpaceManager<F>,
    archiver: ArchiveManager<F, B>,
    mounter: M,
    idle: Option<I>,
    sleeper: S,
    shutdown: H,
    logger: L,
    config: CoordinatorConfig,
    state: CoordinatorState,
    summary: RunSummary,
}

impl<F, C, B, M, I, S, H, L> Coordinator<F, C, B, M, I, S, H, L>
where
    F: Filesystem,
    C: Clock,
    B: ArchiveBackend,
    M: ImageMounter,
    I: IdleDetector,
    S: Sleeper,
    H: ShutdownCheck,
    L: Logger,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        snapshots: SnapshotManager<F, C>,
        space: SpaceManager<F>,
        archiver: ArchiveManager<F, B>,
        mounter: M,
        idle: Option<I>,
        sleeper: S,
        shutdown: H,
        logger: L,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            snapshots,
            space,
            archiver,
            mounter,
            idle,
            sleeper,
            shutdown,
            logger,
            config,
            state: CoordinatorState::Idle,
            summary: RunSummary::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// The snapshot registry, for status reporting.
    pub fn snapshots(&self) -> &SnapshotManager<F, C> {
        &self.snapshots
    }

    /// Field-level transition so callers holding a snapshot handle (which
    /// borrows the registry) can still advance the state.
    fn transition(logger: &L, state: &mut CoordinatorState, next: CoordinatorState) {
        if *state != next {
            logger.debug(&format!("state: {:?} -> {:?}", *state, next));
            *state = next;
        }
    }

    fn set_state(&mut self, state: CoordinatorState) {
        Self::transition(&self.logger, &mut self.state, state);
    }

    /// Sleep `seconds` in one-second steps, watching the shutdown flag.
    ///
    /// Returns false if shutdown was requested during the wait.
    fn wait_interruptible(&self, seconds: u64) -> bool {
        for _ in 0..seconds {
            if self.shutdown.should_stop() {
                return false;
            }
            self.sleeper.sleep_sec(1);
        }
        !self.shutdown.should_stop()
    }

    /// Block until the archive destination answers, with capped backoff.
    ///
    /// Returns false on shutdown.
    fn await_reachable(&mut self) -> bool {
        self.set_state(CoordinatorState::Idle);
        let mut intervals = BackoffIntervals::new(
            self.config.poll_interval_secs,
            self.config.max_backoff_secs,
        );
        loop {
            if self.shutdown.should_stop() {
                return false;
            }
            if self.archiver.backend().is_reachable() {
                self.logger.verbose("archive destination reachable");
                return true;
            }
            let delay = intervals.next_interval();
            self.logger
                .verbose(&format!("archive not reachable, retrying in {delay}s"));
            if !self.wait_interruptible(delay) {
                return false;
            }
        }
    }

    /// Evict every unreferenced snapshot, with stale-count accounting.
    fn sweep(&mut self) -> Result<u64, SnapshotError> {
        self.set_state(CoordinatorState::Sweep);
        let mut stale = 0;
        while self.snapshots.delete_oldest_if_deletable()? {
            stale += 1;
        }
        match stale {
            0 => {}
            // One stale snapshot is expected after an unclean shutdown; the
            // post-archive deletion never ran.
            1 => self
                .logger
                .warn("deleted 1 stale snapshot (likely unclean shutdown)"),
            // Eager deletion keeps at most one snapshot alive; more than one
            // points at a lifecycle bug.
            n => self.logger.error(&format!(
                "deleted {n} stale snapshots, expected at most 1"
            )),
        }
        Ok(stale)
    }

    /// Run one full cycle. `Err` only for terminating failures.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, CoordinatorError> {
        // Wait for the car to go quiet before snapshotting
        self.set_state(CoordinatorState::AwaitIdle);
        match &mut self.idle {
            Some(detector) => {
                if !detector.wait_for_idle(self.config.idle_timeout_secs) {
                    if self.shutdown.should_stop() {
                        return Ok(CycleOutcome::Interrupted);
                    }
                    self.logger
                        .warn("timeout waiting for idle, proceeding anyway");
                }
            }
            None => {
                if !self.wait_interruptible(self.config.settle_delay_secs) {
                    return Ok(CycleOutcome::Interrupted);
                }
            }
        }

        let swept = match self.sweep() {
            Ok(swept) => swept,
            Err(e) => {
                self.logger.error(&format!("sweep failed: {e}"));
                return Ok(CycleOutcome::Failed);
            }
        };
        if !self.config.archive_enabled {
            self.logger
                .debug(&format!("archiving disabled; swept {swept} snapshots"));
            return Ok(CycleOutcome::SweepOnly);
        }

        if let Err(e) = self.space.ensure_space_for_snapshot(&self.snapshots) {
            match e {
                SpaceError::NoSpace {
                    free_bytes,
                    needed_bytes,
                } => self.logger.error(&format!(
                    "snapshot would not fit: {free_bytes} bytes free, {needed_bytes} needed"
                )),
                other => self.logger.error(&format!("space check failed: {other}")),
            }
            return Ok(CycleOutcome::Failed);
        }

        self.set_state(CoordinatorState::Snapshot);
        let handle = match self.snapshots.snapshot_session() {
            Ok(handle) => handle,
            Err(SnapshotError::Fs(FsError::Unsupported(msg))) => {
                return Err(CoordinatorError::Unsupported(msg));
            }
            Err(e) => {
                self.logger.error(&format!("snapshot failed: {e}"));
                return Ok(CycleOutcome::Failed);
            }
        };
        let snapshot_id = handle.id();
        self.logger
            .info(&format!("snapshot {snapshot_id} created, archiving"));

        Self::transition(&self.logger, &mut self.state, CoordinatorState::Archive);
        let mounted = match self.mounter.mount_readonly(&handle.snapshot().image_path()) {
            Ok(mounted) => mounted,
            Err(e) => {
                self.logger
                    .error(&format!("cannot mount snapshot {snapshot_id}: {e}"));
                drop(handle);
                return Ok(CycleOutcome::Failed);
            }
        };

        let archive_result = self
            .archiver
            .archive_clips(mounted.path(), &self.shutdown);

        if let Err(e) = self.mounter.unmount(&mounted) {
            self.logger
                .warn(&format!("unmount of snapshot {snapshot_id} failed: {e}"));
        }
        drop(handle);

        match archive_result {
            Ok(report) if report.interrupted => {
                // Keep the snapshot; the destination's skip-if-present makes
                // the next cycle cheap, and the sweep reclaims it.
                self.logger.info("archive interrupted by shutdown");
                Ok(CycleOutcome::Interrupted)
            }
            Ok(report) => {
                self.set_state(CoordinatorState::Delete);
                if let Err(e) = self.snapshots.delete(snapshot_id) {
                    self.logger.warn(&format!(
                        "failed to delete snapshot {snapshot_id} after archive: {e} \
                         (will retry next cycle)"
                    ));
                }
                self.logger.info(&format!(
                    "archive cycle complete: {} copied, {} skipped, {} bytes",
                    report.files_copied, report.files_skipped, report.bytes_copied
                ));
                Ok(CycleOutcome::Archived(report))
            }
            Err(ArchiveError::Recoverable(msg)) => {
                // Released but not deleted; next cycle's sweep clears it
                self.logger.warn(&format!("archive cycle failed: {msg}"));
                Ok(CycleOutcome::Failed)
            }
            Err(ArchiveError::Fatal(msg)) => Err(CoordinatorError::FatalArchive(msg)),
        }
    }

    /// One reachability check plus one cycle (the `archive` command).
    pub fn run_once(&mut self) -> Result<CycleOutcome, CoordinatorError> {
        if self.config.archive_enabled && !self.archiver.backend().is_reachable() {
            self.logger.error("archive destination not reachable");
            return Ok(CycleOutcome::Failed);
        }
        let outcome = self.run_cycle()?;
        self.account(&outcome);
        Ok(outcome)
    }

    fn account(&mut self, outcome: &CycleOutcome) {
        self.summary.cycles += 1;
        match outcome {
            CycleOutcome::Archived(report) => {
                self.summary.archived_cycles += 1;
                self.summary.files_copied += report.files_copied as u64;
                self.summary.files_skipped += report.files_skipped as u64;
            }
            CycleOutcome::Failed => self.summary.failed_cycles += 1,
            CycleOutcome::SweepOnly | CycleOutcome::Interrupted => {}
        }
    }

    /// Run until shutdown. Returns counters, or the terminating error.
    pub fn run(&mut self) -> Result<RunSummary, CoordinatorError> {
        let mut idle_backoff = BackoffIntervals::new(
            self.config.poll_interval_secs,
            self.config.max_backoff_secs,
        );

        loop {
            if self.shutdown.should_stop() {
                break;
            }

            if self.config.archive_enabled && !self.await_reachable() {
                break;
            }

            let outcome = self.run_cycle()?;
            self.account(&outcome);

            let delay = match &outcome {
                CycleOutcome::Interrupted => break,
                CycleOutcome::Archived(report) if report.files_copied == 0 => {
                    // Nothing to archive: back off instead of hot-looping
                    let delay = idle_backoff.next_interval();
                    self.logger
                        .verbose(&format!("no new clips, next cycle in {delay}s"));
                    delay
                }
                CycleOutcome::Archived(_) => {
                    idle_backoff.reset();
                    self.config.poll_interval_secs
                }
                CycleOutcome::SweepOnly => idle_backoff.next_interval(),
                CycleOutcome::Failed => {
                    idle_backoff.reset();
                    ERROR_RETRY_SECS
                }
            };

            if !self.wait_interruptible(delay) {
                break;
            }
        }

        self.set_state(CoordinatorState::Exiting);
        self.logger.info(&format!(
            "coordinator stopped: {} cycles, {} archived, {} failed",
            self.summary.cycles, self.summary.archived_cycles, self.summary.failed_cycles
        ));
        Ok(std::mem::take(&mut self.summary))
    }
}

/// Paths derived from the backing volume mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackingPaths {
    pub root: PathBuf,
    pub cam_disk: PathBuf,
    pub snapshots_dir: PathBuf,
}

impl BackingPaths {
    pub fn new(backing_dir: &std::path::Path) -> Self {
        Self {
            root: backing_dir.to_path_buf(),
            cam_disk: backing_dir.join("cam_disk.bin"),
            snapshots_dir: backing_dir.join("snapshots"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idle::MockIdleDetector;
    use crate::logger::MockLogger;
    use crate::mount::MockMounter;
    use camvault_archive::{ClipFlags, MockArchiveBackend};
    use camvault_fs::MockFilesystem;
    use camvault_runtime::{CountdownShutdown, MockClock, MockSleeper, NeverShutdown, ShutdownFlag};
    use std::path::Path;

    const BACKING: &str = "/backing";
    const MOUNT: &str = "/mnt/snap";

    struct Fixture {
        fs: MockFilesystem,
        backend: MockArchiveBackend,
        mounter: MockMounter,
        logger: MockLogger,
    }

    impl Fixture {
        fn new() -> Self {
            let fs = MockFilesystem::new();
            fs.add_file("/backing/cam_disk.bin", vec![0xAA; 2048]);
            fs.add_dir(MOUNT);
            Self {
                fs,
                backend: MockArchiveBackend::new(),
                mounter: MockMounter::new(PathBuf::from(MOUNT)),
                logger: MockLogger::new(),
            }
        }

        fn add_clip(&self, rel: &str, bytes: usize) {
            self.fs.add_file(format!("{MOUNT}/{rel}"), vec![0; bytes]);
        }

        fn coordinator<H: ShutdownCheck>(
            &self,
            shutdown: H,
            config: CoordinatorConfig,
        ) -> Coordinator<
            MockFilesystem,
            MockClock,
            MockArchiveBackend,
            MockMounter,
            MockIdleDetector,
            MockSleeper,
            H,
            MockLogger,
        > {
            let paths = BackingPaths::new(Path::new(BACKING));
            let snapshots = SnapshotManager::new(
                self.fs.clone(),
                MockClock::new(1000),
                paths.cam_disk.clone(),
                paths.snapshots_dir.clone(),
            );
            snapshots.load().expect("load");
            let space = SpaceManager::new(self.fs.clone(), paths.snapshots_dir, 2048);
            let archiver = ArchiveManager::new(
                self.fs.clone(),
                self.backend.clone(),
                ClipFlags::default(),
            )
            .with_min_clip_bytes(10);

            Coordinator::new(
                snapshots,
                space,
                archiver,
                self.mounter.clone(),
                Some(MockIdleDetector::idle()),
                MockSleeper::new(),
                shutdown,
                self.logger.clone(),
                config,
            )
        }
    }

    // ===========================================
    // Backoff intervals
    // ===========================================

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = BackoffIntervals::new(5, 300);
        let taken: Vec<u64> = (0..8).map(|_| backoff.next_interval()).collect();
        assert_eq!(taken, vec![5, 10, 20, 40, 80, 160, 300, 300]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = BackoffIntervals::new(5, 300);
        backoff.next_interval();
        backoff.next_interval();
        backoff.reset();
        assert_eq!(backoff.next_interval(), 5);
    }

    #[test]
    fn test_backoff_base_above_cap() {
        let mut backoff = BackoffIntervals::new(100, 30);
        assert_eq!(backoff.next_interval(), 30);
        assert_eq!(backoff.next_interval(), 30);
    }

    #[test]
    fn test_backoff_zero_base_clamped() {
        let mut backoff = BackoffIntervals::new(0, 10);
        assert_eq!(backoff.next_interval(), 1);
    }

    // ===========================================
    // Single cycles
    // ===========================================

    #[test]
    fn test_cycle_archives_and_deletes() {
        let fixture = Fixture::new();
        fixture.add_clip("TeslaCam/SavedClips/a.mp4", 500);

        let mut coordinator =
            fixture.coordinator(NeverShutdown, CoordinatorConfig::default());
        let outcome = coordinator.run_once().expect("cycle");

        match outcome {
            CycleOutcome::Archived(report) => {
                assert_eq!(report.files_copied, 1);
            }
            other => panic!("expected Archived, got {other:?}"),
        }
        // Snapshot archived then deleted; registry empty at steady state
        assert!(coordinator.snapshots().is_empty());
        assert_eq!(fixture.backend.copied_count(), 1);
        assert!(fixture.mounter.balanced());
    }

    #[test]
    fn test_cycle_unreachable_backend_fails() {
        let fixture = Fixture::new();
        fixture.backend.set_reachable(false);

        let mut coordinator =
            fixture.coordinator(NeverShutdown, CoordinatorConfig::default());
        let outcome = coordinator.run_once().expect("cycle");
        assert_eq!(outcome, CycleOutcome::Failed);
        assert!(fixture.logger.contains("not reachable"));
    }

    #[test]
    fn test_cycle_sweep_only_when_archive_disabled() {
        let fixture = Fixture::new();
        let config = CoordinatorConfig {
            archive_enabled: false,
            ..CoordinatorConfig::default()
        };
        let mut coordinator = fixture.coordinator(NeverShutdown, config);

        let outcome = coordinator.run_once().expect("cycle");
        assert_eq!(outcome, CycleOutcome::SweepOnly);
        assert_eq!(fixture.backend.copied_count(), 0);
        assert!(coordinator.snapshots().is_empty());
    }

    #[test]
    fn test_cycle_recoverable_failure_keeps_snapshot() {
        let fixture = Fixture::new();
        fixture.add_clip("TeslaCam/SavedClips/a.mp4", 500);
        fixture.backend.fail_path("SavedClips/a.mp4", false);

        let mut coordinator =
            fixture.coordinator(NeverShutdown, CoordinatorConfig::default());
        let outcome = coordinator.run_once().expect("cycle");

        assert_eq!(outcome, CycleOutcome::Failed);
        // Released but not deleted
        let remaining = coordinator.snapshots().list();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].refcount, 0);
    }

    #[test]
    fn test_recoverable_failure_swept_on_next_cycle() {
        let fixture = Fixture::new();
        fixture.add_clip("TeslaCam/SavedClips/a.mp4", 500);
        fixture.backend.fail_path("SavedClips/a.mp4", false);

        let mut coordinator =
            fixture.coordinator(NeverShutdown, CoordinatorConfig::default());
        coordinator.run_once().expect("failing cycle");
        assert_eq!(coordinator.snapshots().len(), 1);

        let outcome = coordinator.run_once().expect("second cycle");
        // The scripted fail_path persists in the mock, so this cycle also
        // fails, but the sweep must still have removed the orphan snapshot
        // before creating the new one.
        assert_eq!(outcome, CycleOutcome::Failed);
        assert_eq!(coordinator.snapshots().len(), 1);
        assert!(fixture.logger.contains("stale snapshot"));
    }

    #[test]
    fn test_cycle_fatal_archive_terminates() {
        let fixture = Fixture::new();
        fixture.add_clip("TeslaCam/SavedClips/a.mp4", 500);
        fixture.backend.fail_next_fatal("auth expired");

        let mut coordinator =
            fixture.coordinator(NeverShutdown, CoordinatorConfig::default());
        let result = coordinator.run_once();
        assert!(matches!(result, Err(CoordinatorError::FatalArchive(_))));
    }

    #[test]
    fn test_cycle_unsupported_reflink_terminates() {
        let fixture = Fixture::new();
        fixture.fs.fail_next(
            camvault_fs::MockOp::Reflink,
            FsError::Unsupported("no reflink on ext4".to_string()),
        );

        let mut coordinator =
            fixture.coordinator(NeverShutdown, CoordinatorConfig::default());
        let result = coordinator.run_once();
        assert!(matches!(result, Err(CoordinatorError::Unsupported(_))));
    }

    #[test]
    fn test_cycle_mount_failure_releases_handle() {
        let fixture = Fixture::new();
        fixture.mounter.fail_next_mount();

        let mut coordinator =
            fixture.coordinator(NeverShutdown, CoordinatorConfig::default());
        let outcome = coordinator.run_once().expect("cycle");

        assert_eq!(outcome, CycleOutcome::Failed);
        // Handle released; snapshot deletable by the next sweep
        let remaining = coordinator.snapshots().list();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].refcount, 0);
    }

    #[test]
    fn test_cycle_interrupted_archive_keeps_snapshot() {
        let fixture = Fixture::new();
        fixture.add_clip("TeslaCam/SavedClips/a.mp4", 500);
        fixture.add_clip("TeslaCam/SavedClips/b.mp4", 500);

        // The archive copy loop is the only poller in this cycle, so the
        // flag flips between the first and second clip.
        let shutdown = CountdownShutdown::after(1);
        let mut coordinator =
            fixture.coordinator(shutdown, CoordinatorConfig::default());
        let outcome = coordinator.run_once().expect("cycle");

        assert_eq!(outcome, CycleOutcome::Interrupted);
        assert_eq!(coordinator.snapshots().len(), 1);
        assert!(fixture.mounter.balanced());
    }

    #[test]
    fn test_cycle_no_space_fails_cycle() {
        let fixture = Fixture::new();
        // Free space below cam size with nothing to evict
        fixture.fs.set_free_bytes(100);

        let mut coordinator =
            fixture.coordinator(NeverShutdown, CoordinatorConfig::default());
        let outcome = coordinator.run_once().expect("cycle");

        assert_eq!(outcome, CycleOutcome::Failed);
        assert!(fixture.logger.contains("would not fit"));
    }

    #[test]
    fn test_settle_delay_used_without_idle_detector() {
        let fixture = Fixture::new();
        let paths = BackingPaths::new(Path::new(BACKING));
        let snapshots = SnapshotManager::new(
            fixture.fs.clone(),
            MockClock::new(1000),
            paths.cam_disk.clone(),
            paths.snapshots_dir.clone(),
        );
        snapshots.load().expect("load");
        let space = SpaceManager::new(fixture.fs.clone(), paths.snapshots_dir, 2048);
        let archiver = ArchiveManager::new(
            fixture.fs.clone(),
            fixture.backend.clone(),
            ClipFlags::default(),
        );
        let sleeper = MockSleeper::new();
        let config = CoordinatorConfig {
            settle_delay_secs: 7,
            ..CoordinatorConfig::default()
        };
        let mut coordinator: Coordinator<_, _, _, _, MockIdleDetector, _, _, _> =
            Coordinator::new(
                snapshots,
                space,
                archiver,
                fixture.mounter.clone(),
                None,
                sleeper.clone(),
                NeverShutdown,
                fixture.logger.clone(),
                config,
            );

        coordinator.run_once().expect("cycle");
        assert_eq!(sleeper.total_sec(), 7);
    }

    // ===========================================
    // The outer loop
    // ===========================================

    #[test]
    fn test_run_exits_on_shutdown() {
        let fixture = Fixture::new();
        fixture.add_clip("TeslaCam/SavedClips/a.mp4", 500);

        let shutdown = ShutdownFlag::manual();
        shutdown.trigger();
        let mut coordinator =
            fixture.coordinator(shutdown, CoordinatorConfig::default());

        let summary = coordinator.run().expect("run");
        assert_eq!(summary.cycles, 0);
        assert_eq!(coordinator.state(), CoordinatorState::Exiting);
    }

    #[test]
    fn test_run_completes_cycles_then_stops() {
        let fixture = Fixture::new();
        fixture.add_clip("TeslaCam/SavedClips/a.mp4", 500);

        // Generous budget: at least one full cycle before the flag flips
        let shutdown = CountdownShutdown::after(40);
        let mut coordinator =
            fixture.coordinator(shutdown, CoordinatorConfig::default());

        let summary = coordinator.run().expect("run");
        assert!(summary.cycles >= 1);
        assert!(summary.archived_cycles >= 1);
        assert!(summary.files_copied >= 1);
        assert!(coordinator.snapshots().is_empty());
    }

    #[test]
    fn test_run_fatal_archive_propagates() {
        let fixture = Fixture::new();
        fixture.add_clip("TeslaCam/SavedClips/a.mp4", 500);
        fixture.backend.fail_next_fatal("bad credentials");

        let mut coordinator =
            fixture.coordinator(NeverShutdown, CoordinatorConfig::default());
        let result = coordinator.run();
        assert!(matches!(result, Err(CoordinatorError::FatalArchive(_))));
    }

    // ===========================================
    // BackingPaths
    // ===========================================

    #[test]
    fn test_backing_paths() {
        let paths = BackingPaths::new(Path::new("/backingfiles"));
        assert_eq!(paths.cam_disk, PathBuf::from("/backingfiles/cam_disk.bin"));
        assert_eq!(
            paths.snapshots_dir,
            PathBuf::from("/backingfiles/snapshots")
        );
    }
}
