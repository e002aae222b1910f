//! Camvault CLI binary.
//!
//! Entry point for the `camvault` command.

use std::process::ExitCode;

use camvault_archive::RcloneBackend;
use camvault_daemon::commands::{
    execute_archive, execute_clean, execute_run, execute_status, RunOptions,
};
use camvault_daemon::coordinator::CycleOutcome;
use camvault_daemon::exit::{codes, exit_code};
use camvault_daemon::idle::ProcIdleDetector;
use camvault_daemon::mount::LoopMounter;
use camvault_daemon::{Cli, Command, CommandError, Config, Logger, StderrLogger, Verbosity};
use camvault_fs::RealFilesystem;
use camvault_runtime::{RealSleeper, ShutdownFlag, SystemClock};
use clap::Parser;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let logger = StderrLogger::new(Verbosity::from_count(cli.verbose));

    match dispatch(&cli, logger) {
        Ok(()) => ExitCode::from(codes::SUCCESS as u8),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(exit_code(&e) as u8)
        }
    }
}

fn rclone_backend(config: &Config, shutdown: &ShutdownFlag) -> RcloneBackend {
    RcloneBackend::new(
        &config.archive.rclone_remote,
        &config.archive.rclone_path,
        config.archive.rclone_flags.clone(),
    )
    .with_cancel(shutdown.clone())
}

fn dispatch(cli: &Cli, logger: StderrLogger) -> Result<(), CommandError> {
    let config = Config::load(cli.config.as_deref())?;
    let fs = RealFilesystem;
    let clock = SystemClock;

    match &cli.command {
        Command::Run(args) => {
            let options = RunOptions::new(cli.backing_dir.clone(), args, &config)?;
            let shutdown = ShutdownFlag::new();
            let backend = rclone_backend(&config, &shutdown);
            let mounter = LoopMounter::new(std::env::temp_dir());
            let idle = Some(ProcIdleDetector::new(RealSleeper::new(), shutdown.clone()));

            let summary = execute_run(
                &options,
                fs,
                clock,
                backend,
                mounter,
                idle,
                RealSleeper::new(),
                shutdown,
                logger,
            )?;

            println!(
                "Cycles: {} ({} archived, {} failed)",
                summary.cycles, summary.archived_cycles, summary.failed_cycles
            );
            println!(
                "Files: {} copied, {} skipped",
                summary.files_copied, summary.files_skipped
            );
            Ok(())
        }
        Command::Archive(args) => {
            let options = RunOptions::new(cli.backing_dir.clone(), args, &config)?;
            let shutdown = ShutdownFlag::new();
            let backend = rclone_backend(&config, &shutdown);
            let mounter = LoopMounter::new(std::env::temp_dir());
            let idle = Some(ProcIdleDetector::new(RealSleeper::new(), shutdown.clone()));

            let outcome = execute_archive(
                &options,
                fs,
                clock,
                backend,
                mounter,
                idle,
                RealSleeper::new(),
                shutdown,
                logger,
            )?;

            match outcome {
                CycleOutcome::Archived(report) => println!(
                    "Archived: {} copied, {} skipped, {} bytes",
                    report.files_copied, report.files_skipped, report.bytes_copied
                ),
                CycleOutcome::SweepOnly => println!("Archiving disabled; snapshots swept"),
                CycleOutcome::Interrupted => println!("Interrupted"),
                CycleOutcome::Failed => unreachable!("mapped to CommandError"),
            }
            Ok(())
        }
        Command::Status(args) => {
            let report = execute_status(&cli.backing_dir, fs, clock)?;
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report)
                        .expect("status serialization cannot fail")
                );
            } else {
                print!("{}", report.render());
            }
            Ok(())
        }
        Command::Clean => {
            let report = execute_clean(&cli.backing_dir, fs, clock)?;
            logger.info(&format!(
                "removed {} snapshots ({} partial directories reaped)",
                report.removed, report.partials_reaped
            ));
            println!(
                "Removed {} snapshots, reaped {} partial directories",
                report.removed, report.partials_reaped
            );
            Ok(())
        }
    }
}
