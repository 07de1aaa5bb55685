//! Configuration for lsdup
//!
//! CLI arguments are parsed with clap derive macros and validated into a [`Config`].

use std::path::PathBuf;
use std::thread;

use clap::Parser;

use crate::error::Error;

/// Maximum worker thread count
pub const MAX_THREADS: usize = 100;

/// List duplicate (in content) file pairs
#[derive(Parser, Debug, Clone)]
#[command(
    name = "lsdup",
    version,
    about = "List duplicate (in content) file pairs",
    long_about = "Lists pairs of files with identical content, one pair per line, \
                  scanning the current directory by default.",
    after_help = "EXAMPLES:\n    \
        lsdup\n    \
        lsdup -r ~/photos\n    \
        lsdup -t 16 -r /data > dups.txt"
)]
pub struct CliArgs {
    /// Directory to scan
    #[arg(value_name = "DIRECTORY", default_value = ".")]
    pub directory: PathBuf,

    /// Number of worker threads
    #[arg(short = 't', long, default_value_t = default_threads(), value_name = "NUM")]
    pub threads: usize,

    /// Scan directories recursively
    #[arg(short = 'r', short_alias = 'R', long)]
    pub recursive: bool,

    /// Verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn default_threads() -> usize {
    thread::available_parallelism()
        .map_or(1, |n| n.get())
        .min(MAX_THREADS)
}

/// Validated run configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub directory: PathBuf,
    pub threads: usize,
    pub recursive: bool,
    pub verbose: bool,
}

impl Config {
    /// Validates CLI arguments.
    pub fn from_args(args: CliArgs) -> Result<Self, Error> {
        if !(1..=MAX_THREADS).contains(&args.threads) {
            return Err(Error::InvalidArgument(format!(
                "thread count must be between 1 and {MAX_THREADS}, got {}",
                args.threads
            )));
        }
        if !args.directory.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "{} is not a directory",
                args.directory.display()
            )));
        }

        Ok(Self {
            directory: args.directory,
            threads: args.threads,
            recursive: args.recursive,
            verbose: args.verbose,
        })
    }
}
