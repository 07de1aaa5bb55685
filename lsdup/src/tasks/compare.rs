//! Pairwise comparison of same-size files.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use crossbeam_epoch as epoch;
use itertools::Itertools;
use tracing::{debug, warn};

use super::{read_chunk, Context, FileDesc, Stats, CHUNK_SIZE};
use crate::error::Error;
use crate::map::NonblockingMap;

/// Seeds the compare phase.
pub fn start(ctx: &Context) -> Result<(), Error> {
    ctx.seed(enqueue_groups)
}

fn enqueue_groups(ctx: &Context) {
    let guard = &epoch::pin();
    for (size, group) in ctx.map.iter(guard) {
        if ctx.is_interrupted() {
            return;
        }
        if group.len() < 2 {
            continue;
        }
        ctx.submit(move |ctx| compare_group(ctx, size));
    }
}

/// Walks every unordered pair of the group for `size`.
fn compare_group(ctx: &Context, size: u64) {
    let guard = &epoch::pin();
    let Some(group) = ctx.map.lookup(&size, guard) else {
        return;
    };
    debug!(size, files = group.len(), "comparing group");

    for (a, b) in group.iter().tuple_combinations() {
        if ctx.is_interrupted() {
            return;
        }
        if a.size == 0 && b.size == 0 {
            ctx.reporter.report(&a.path, &b.path);
            continue;
        }
        if let (Some(ha), Some(hb)) = (a.hash(), b.hash()) {
            if ha != hb {
                continue;
            }
        }
        let (a, b) = (Arc::clone(a), Arc::clone(b));
        ctx.submit(move |ctx| compare_files(ctx, &a, &b));
    }
}

fn compare_files(ctx: &Context, a: &FileDesc, b: &FileDesc) {
    if ctx.is_interrupted() {
        return;
    }
    Stats::bump(&ctx.stats.compared);
    match same_contents(&a.path, &b.path, a.size) {
        Ok(true) => ctx.reporter.report(&a.path, &b.path),
        Ok(false) => {}
        Err(e) => {
            warn!(
                a = %a.path.display(),
                b = %b.path.display(),
                error = %e,
                "cannot compare"
            );
            Stats::bump(&ctx.stats.errors);
        }
    }
}

/// Compares the first `len` bytes of two files.
///
/// Fails with `UnexpectedEof` if either file is shorter than `len`.
pub fn same_contents(a: &Path, b: &Path, len: u64) -> io::Result<bool> {
    let mut ra = File::open(a)?.take(len);
    let mut rb = File::open(b)?.take(len);
    let mut ba = vec![0u8; CHUNK_SIZE];
    let mut bb = vec![0u8; CHUNK_SIZE];
    let mut compared = 0u64;

    loop {
        let na = read_chunk(&mut ra, &mut ba)?;
        let nb = read_chunk(&mut rb, &mut bb)?;
        if na != nb {
            break;
        }
        if na == 0 {
            if compared == len {
                return Ok(true);
            }
            break;
        }
        if ba[..na] != bb[..nb] {
            return Ok(false);
        }
        compared += na as u64;
    }

    Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("file shorter than {len} bytes after {compared}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn detects_equal_and_different_files() {
        let dir = tempdir().unwrap();
        let content = vec![7u8; CHUNK_SIZE * 2 + 3];
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let c = dir.path().join("c");
        fs::write(&a, &content).unwrap();
        fs::write(&b, &content).unwrap();
        let mut other = content.clone();
        other[CHUNK_SIZE + 1] = 8;
        fs::write(&c, &other).unwrap();

        let len = content.len() as u64;
        assert!(same_contents(&a, &b, len).unwrap());
        assert!(!same_contents(&a, &c, len).unwrap());
    }

    #[test]
    fn truncated_file_is_an_error() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"abcdef").unwrap();
        fs::write(&b, b"abc").unwrap();
        let err = same_contents(&a, &b, 6).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
