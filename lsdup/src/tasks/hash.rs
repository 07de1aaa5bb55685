//! Content hashing of large size groups.
//!
//! Hashing pays off only when a group is big enough that hashing every member is cheaper than
//! comparing every pair, so small groups go straight to comparison.

use std::fs::File;
use std::hash::{BuildHasher, Hasher};
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use ahash::RandomState;
use crossbeam_epoch as epoch;
use tracing::{debug, warn};

use super::{read_chunk, Context, FileDesc, Stats, CHUNK_SIZE};
use crate::error::Error;

/// Minimum group size worth hashing.
pub const HASH_THRESHOLD: usize = 4;

/// Fixed seeds so that every task hashes the same content to the same value.
fn seeded() -> RandomState {
    RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
}

/// Seeds the hash phase.
pub fn start(ctx: &Context) -> Result<(), Error> {
    ctx.seed(enqueue_groups)
}

fn enqueue_groups(ctx: &Context) {
    let guard = &epoch::pin();
    for (size, group) in ctx.map.iter(guard) {
        if ctx.is_interrupted() {
            return;
        }
        if size == 0 || group.len() < HASH_THRESHOLD {
            continue;
        }
        debug!(size, files = group.len(), "hashing group");
        for file in group {
            let file = Arc::clone(file);
            ctx.submit(move |ctx| hash_file(ctx, &file));
        }
    }
}

fn hash_file(ctx: &Context, file: &FileDesc) {
    if ctx.is_interrupted() {
        return;
    }
    match hash_contents(&file.path, file.size) {
        Ok(hash) => {
            file.set_hash(hash);
            Stats::bump(&ctx.stats.hashed);
        }
        Err(e) => {
            warn!(path = %file.path.display(), error = %e, "cannot hash");
            Stats::bump(&ctx.stats.errors);
        }
    }
}

/// Hashes the first `len` bytes of the file at `path`.
///
/// Fails with `UnexpectedEof` if the file is shorter than `len`.
pub fn hash_contents(path: &Path, len: u64) -> io::Result<u64> {
    let mut reader = File::open(path)?.take(len);
    let mut hasher = seeded().build_hasher();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut hashed = 0u64;

    loop {
        let n = read_chunk(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        hasher.write(&buf[..n]);
        hashed += n as u64;
    }

    if hashed != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read {hashed} of {len} bytes"),
        ));
    }
    Ok(hasher.finish())
}
