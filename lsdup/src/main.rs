//! lsdup - list duplicate (in content) file pairs
//!
//! Entry point for the CLI application.

use std::io;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lsdup::config::{CliArgs, Config};
use lsdup::pipeline;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Conventional exit status for a run stopped by SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if matches!(e.downcast_ref::<lsdup::Error>(), Some(lsdup::Error::Interrupted)) {
                info!("run interrupted");
                return ExitCode::from(EXIT_INTERRUPTED);
            }
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let config = Config::from_args(args).context("Invalid configuration")?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    info!(
        directory = %config.directory.display(),
        threads = config.threads,
        recursive = config.recursive,
        "scanning"
    );

    let summary =
        pipeline::run(&config, io::stdout(), interrupted).context("Duplicate search failed")?;

    info!(
        dirs = summary.dirs,
        files = summary.files,
        groups = summary.groups,
        hashed = summary.hashed,
        compared = summary.compared,
        duplicates = summary.duplicates,
        errors = summary.errors,
        elapsed_ms = summary.duration.as_millis() as u64,
        "done"
    );
    Ok(())
}

/// Logs go to stderr so that stdout carries only duplicate pairs.
fn setup_logging(verbose: bool) -> Result<()> {
    let default = if verbose {
        "lsdup=debug,warn"
    } else {
        "lsdup=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(())
}
