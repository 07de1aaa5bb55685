//! Segment table.

use core::fmt::Debug;
use core::sync::atomic::Ordering;

use arr_macro::arr;
use crossbeam_epoch::{unprotected, Atomic, Guard, Owned};

use crate::error::Error;

/// Lazily allocated table of `Atomic<T>` slots indexed by bucket number.
///
/// The table is a fixed array of segments. Segment `s` holds the `2^s` slots for indices
/// `[2^s, 2^(s+1))`, except segment 0 which holds indices 0 and 1. A segment is allocated the
/// first time one of its slots is written, so growing the logical table never copies or moves an
/// existing slot.
///
/// ```text
///  segments: [ 0 ][ 1 ][ 2 ][ 3 ] ...
///              |    |    |    +--> [8][9][10][11][12][13][14][15]
///              |    |    +-------> [4][5][6][7]
///              |    +------------> [2][3]
///              +-----------------> [0][1]
/// ```
///
/// Installing a segment is a single CAS on its (initially null) entry. Two threads racing to
/// install the same segment both allocate; the loser drops its buffer and uses the winner's.
///
/// When the table is dropped, only the segments are freed and the **elements must not be
/// dropped/deallocated**. They belong to the container the slots point into; in
/// `SplitOrderedList` that is the list.
pub struct SegmentTable<T> {
    segments: [Atomic<Segment<T>>; SEGMENTS],
    /// Segments at or past this position are never allocated.
    limit: usize,
}

/// One segment per bit of a 64-bit index.
const SEGMENTS: usize = 64;

struct Segment<T> {
    slots: Box<[Atomic<T>]>,
}

impl<T> Segment<T> {
    fn new(len: usize) -> Result<Self, Error> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(len)
            .map_err(|_| Error::OutOfMemory)?;
        slots.resize_with(len, Atomic::null);
        Ok(Self {
            slots: slots.into_boxed_slice(),
        })
    }
}

impl<T> Debug for SegmentTable<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let guard = unsafe { unprotected() };
        let installed = self
            .segments
            .iter()
            .filter(|s| !s.load(Ordering::Relaxed, guard).is_null())
            .count();
        f.debug_struct("SegmentTable")
            .field("segments", &installed)
            .field("limit", &self.limit)
            .finish()
    }
}

impl<T> Drop for SegmentTable<T> {
    /// Deallocate segments, but not the individual elements.
    fn drop(&mut self) {
        unsafe {
            let guard = unprotected();
            for segment in self.segments.iter() {
                let segment = segment.load(Ordering::Relaxed, guard);
                if !segment.is_null() {
                    drop(segment.into_owned());
                }
            }
        }
    }
}

impl<T> Default for SegmentTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SegmentTable<T> {
    /// Creates an empty table. No segment is allocated yet.
    pub fn new() -> Self {
        Self::with_segment_limit(SEGMENTS)
    }

    /// Creates an empty table that allocates at most `limit` segments, covering indices below
    /// `2^limit`. Allocating past the limit fails with `OutOfMemory`.
    pub fn with_segment_limit(limit: usize) -> Self {
        Self {
            segments: arr![Atomic::null(); 64],
            limit: limit.min(SEGMENTS),
        }
    }

    /// Splits `index` into `(segment, offset)`.
    fn locate(index: usize) -> (usize, usize) {
        if index < 2 {
            (0, index)
        } else {
            let segment = (usize::BITS - 1 - index.leading_zeros()) as usize;
            (segment, index - (1 << segment))
        }
    }

    fn segment_len(segment: usize) -> usize {
        if segment == 0 {
            2
        } else {
            1 << segment
        }
    }

    /// Returns the slot at `index` if its segment has been allocated.
    pub fn get<'g>(&'g self, index: usize, guard: &'g Guard) -> Option<&'g Atomic<T>> {
        let (segment, offset) = Self::locate(index);
        let segment = self.segments[segment].load(Ordering::Acquire, guard);
        unsafe { segment.as_ref() }.map(|s| &s.slots[offset])
    }

    /// Returns the slot at `index`, allocating its segment if necessary.
    pub fn get_or_alloc<'g>(&'g self, index: usize, guard: &'g Guard) -> Result<&'g Atomic<T>, Error> {
        let (segment, offset) = Self::locate(index);
        if segment >= self.limit {
            return Err(Error::OutOfMemory);
        }
        let entry = &self.segments[segment];

        let mut current = entry.load(Ordering::Acquire, guard);
        if current.is_null() {
            let new = Owned::new(Segment::new(Self::segment_len(segment))?);
            current = match entry.compare_exchange(
                current,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(installed) => installed,
                Err(e) => {
                    drop(e.new);
                    e.current
                }
            };
        }

        Ok(&unsafe { current.deref() }.slots[offset])
    }
}
