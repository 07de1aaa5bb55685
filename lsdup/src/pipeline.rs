//! Phase driver.
//!
//! Runs walk, hash, compare and release one after another on a shared pool. Each phase is
//! seeded with one task and ends when the pool has no outstanding work.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::pool::{ThreadPool, ThreadPoolBuilder};
use crate::tasks::{compare, hash, release, walk, Context, SizeMap};
use crate::writer::Writer;

/// Outcome of a completed run.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub dirs: u64,
    pub files: u64,
    pub groups: usize,
    pub hashed: u64,
    pub compared: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub duration: Duration,
}

/// Finds duplicate files under `config.directory` and writes one line per pair to `out`.
///
/// Setting `interrupted` stops the walk, hash and compare phases from fanning out further;
/// the map is still released and the run returns `Interrupted`.
pub fn run<W>(config: &Config, out: W, interrupted: Arc<AtomicBool>) -> Result<Summary, Error>
where
    W: Write + Send + 'static,
{
    let started = Instant::now();
    let pool = ThreadPoolBuilder::new().threads(config.threads).build()?;
    let writer = Writer::spawn(out)?;
    let map = Arc::new(SizeMap::new());
    let ctx = Context::new(
        pool.handle(),
        Arc::clone(&map),
        writer.reporter(),
        Arc::clone(&interrupted),
        config.recursive,
    );

    let root: PathBuf = config.directory.clone();
    phase(&pool, "walk", || walk::start(&ctx, root))?;
    let groups = map.len();
    info!(
        files = ctx.stats().files.load(Ordering::Relaxed),
        groups,
        "walk finished"
    );

    phase(&pool, "hash", || hash::start(&ctx))?;
    phase(&pool, "compare", || compare::start(&ctx))?;
    phase(&pool, "release", || release::start(&ctx))?;

    let stats = ctx.stats();
    let mut summary = Summary {
        dirs: stats.dirs.load(Ordering::Relaxed),
        files: stats.files.load(Ordering::Relaxed),
        groups,
        hashed: stats.hashed.load(Ordering::Relaxed),
        compared: stats.compared.load(Ordering::Relaxed),
        errors: stats.errors.load(Ordering::Relaxed),
        ..Summary::default()
    };
    drop(ctx);

    summary.duplicates = writer.finish()?;

    pool.wait_quiescent();
    pool.destroy()?;
    match Arc::try_unwrap(map) {
        Ok(map) => map.destroy()?,
        Err(_) => warn!("size map still shared, leaving it to drop"),
    }

    summary.duration = started.elapsed();
    if interrupted.load(Ordering::Relaxed) {
        return Err(Error::Interrupted);
    }
    Ok(summary)
}

fn phase<F>(pool: &ThreadPool, name: &str, seed: F) -> Result<(), Error>
where
    F: FnOnce() -> Result<(), Error>,
{
    let started = Instant::now();
    debug!(phase = name, "phase started");
    seed()?;
    pool.wait_idle();
    debug!(
        phase = name,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "phase finished"
    );
    Ok(())
}
