//! Directory walk: groups regular files by size.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_epoch as epoch;
use tracing::{trace, warn};

use super::{Candidates, Context, FileDesc, Stats};
use crate::error::{Error, Rejected};
use crate::map::NonblockingMap;

/// Seeds the walk at `root`.
pub fn start(ctx: &Context, root: PathBuf) -> Result<(), Error> {
    ctx.seed(move |ctx| walk_dir(ctx, &root))
}

fn walk_dir(ctx: &Context, dir: &Path) {
    if ctx.is_interrupted() {
        return;
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "cannot read directory");
            Stats::bump(&ctx.stats.errors);
            return;
        }
    };
    Stats::bump(&ctx.stats.dirs);

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "cannot read directory entry");
                Stats::bump(&ctx.stats.errors);
                continue;
            }
        };
        // Does not follow symlinks.
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "cannot stat");
                Stats::bump(&ctx.stats.errors);
                continue;
            }
        };

        let path = entry.path();
        if file_type.is_dir() {
            if ctx.recursive {
                ctx.submit(move |ctx| walk_dir(ctx, &path));
            }
        } else if file_type.is_file() {
            match entry.metadata() {
                Ok(meta) => add_file(ctx, FileDesc::new(path, meta.len())),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot stat");
                    Stats::bump(&ctx.stats.errors);
                }
            }
        }
    }
}

/// Adds `file` to the group for its size, creating the group if needed.
fn add_file(ctx: &Context, file: FileDesc) {
    let guard = &epoch::pin();
    let size = file.size;
    let file = Arc::new(file);

    loop {
        if let Some(group) = ctx.map.lookup(&size, guard) {
            group.push(file);
            break;
        }

        let group = Candidates::new();
        group.push(Arc::clone(&file));
        match ctx.map.insert(&size, group, guard) {
            Ok(()) => {
                trace!(size, "new size group");
                break;
            }
            // Another task created the group first: retry the lookup.
            Err(Rejected {
                kind: Error::AlreadyExists,
                ..
            }) => continue,
            Err(rejected) => {
                warn!(path = %file.path.display(), error = %rejected, "file skipped");
                Stats::bump(&ctx.stats.errors);
                return;
            }
        }
    }
    Stats::bump(&ctx.stats.files);
}
