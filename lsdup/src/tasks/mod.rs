//! Pipeline tasks.
//!
//! Each phase is seeded with one task that fans out into more tasks through the pool. Tasks never
//! wait on each other; the caller observes the end of a phase with `ThreadPool::wait_idle`.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use lockfree::Bag;
use tracing::warn;

use crate::error::Error;
use crate::hash_table::SplitOrderedList;
use crate::pool::Handle;
use crate::writer::Reporter;

pub mod compare;
pub mod hash;
pub mod release;
pub mod walk;

/// Read size for hashing and comparing.
pub const CHUNK_SIZE: usize = 1 << 20;

/// A regular file found by the walk.
#[derive(Debug)]
pub struct FileDesc {
    pub path: PathBuf,
    pub size: u64,
    hash: OnceLock<u64>,
}

impl FileDesc {
    pub fn new(path: PathBuf, size: u64) -> Self {
        Self {
            path,
            size,
            hash: OnceLock::new(),
        }
    }

    /// Content hash, if it has been computed.
    pub fn hash(&self) -> Option<u64> {
        self.hash.get().copied()
    }

    fn set_hash(&self, hash: u64) {
        let _ = self.hash.set(hash);
    }
}

/// Files of one size.
pub type Candidates = Bag<Arc<FileDesc>>;

/// Candidate groups keyed by file size.
pub type SizeMap = SplitOrderedList<Candidates>;

/// Counters shared by all tasks of a run.
#[derive(Debug, Default)]
pub struct Stats {
    pub dirs: AtomicU64,
    pub files: AtomicU64,
    pub hashed: AtomicU64,
    pub compared: AtomicU64,
    pub errors: AtomicU64,
}

impl Stats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything a task needs. Cheap to clone; every task owns one.
#[derive(Debug, Clone)]
pub struct Context {
    pool: Handle,
    map: Arc<SizeMap>,
    reporter: Reporter,
    interrupted: Arc<AtomicBool>,
    recursive: bool,
    stats: Arc<Stats>,
}

impl Context {
    pub fn new(
        pool: Handle,
        map: Arc<SizeMap>,
        reporter: Reporter,
        interrupted: Arc<AtomicBool>,
        recursive: bool,
    ) -> Self {
        Self {
            pool,
            map,
            reporter,
            interrupted,
            recursive,
            stats: Arc::new(Stats::default()),
        }
    }

    pub fn map(&self) -> &SizeMap {
        &self.map
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    /// Submits the first task of a phase.
    fn seed<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        let ctx = self.clone();
        self.pool.execute(move || f(&ctx))
    }

    /// Submits a follow-up task. A task that cannot be submitted is logged and counted as an
    /// error.
    fn submit<F>(&self, f: F)
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        let ctx = self.clone();
        if let Err(e) = self.pool.execute(move || f(&ctx)) {
            warn!(error = %e, "task dropped");
            Stats::bump(&self.stats.errors);
        }
    }
}

/// Reads until `buf` is full or the reader is exhausted.
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
