//! Removes every group from the size map so that the map can be destroyed.

use crossbeam_epoch as epoch;
use tracing::{debug, warn};

use super::Context;
use crate::error::Error;
use crate::map::NonblockingMap;

/// Seeds the release phase. Runs to completion even after an interrupt.
pub fn start(ctx: &Context) -> Result<(), Error> {
    ctx.seed(release_all)
}

fn release_all(ctx: &Context) {
    let guard = &epoch::pin();
    let mut released = 0usize;
    for (size, _) in ctx.map.iter(guard) {
        match ctx.map.delete(&size, guard) {
            Ok(_) => released += 1,
            Err(e) => warn!(size, error = %e, "cannot release group"),
        }
    }
    debug!(groups = released, "released size groups");
}
