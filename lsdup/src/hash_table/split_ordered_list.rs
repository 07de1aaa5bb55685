//! Split-ordered linked list.

use core::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{Guard, Owned};
use lockfree::list::{Cursor, Iter, List, Node};
use tracing::{trace, warn};

use super::segment_table::SegmentTable;
use crate::error::{Error, Rejected};
use crate::map::NonblockingMap;

/// Top bit of a key. Reserved to tell regular nodes from bucket sentinels.
const HI_BIT: u64 = 1 << 63;

/// Lock-free map from `u64` in range [0, 2^63-1] to `V`.
///
/// All entries live in one list sorted by bit-reversed key. Bucket `b` is the sub-range starting
/// at the sentinel node with key `reverse(b)`; doubling the number of buckets only inserts new
/// sentinels, it never moves an entry.
///
/// Keys are not hashed. Callers that need spreading should hash before inserting.
#[derive(Debug)]
pub struct SplitOrderedList<V> {
    /// Lock-free list sorted by recursive-split order. Sentinel nodes carry `None`.
    list: List<u64, Option<V>>,
    /// Pointers to the sentinels of materialized buckets. Bucket 0 is always the list's first
    /// node and is not stored here.
    buckets: SegmentTable<Node<u64, Option<V>>>,
    /// number of buckets
    size: AtomicUsize,
    /// number of items
    count: AtomicUsize,
}

impl<V> Default for SplitOrderedList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SplitOrderedList<V> {
    /// `size` is doubled when `size / count` drops below this.
    const LOAD_FACTOR: usize = 2;

    /// Creates a new split ordered list with two buckets.
    pub fn new() -> Self {
        Self::with_bucket_table(SegmentTable::new())
    }

    /// Like [`new`](Self::new), but bucket sentinels are only published for indices below
    /// `2^segments`. Buckets past that are served from their nearest published ancestor.
    pub fn with_segment_limit(segments: usize) -> Self {
        Self::with_bucket_table(SegmentTable::with_segment_limit(segments))
    }

    fn with_bucket_table(buckets: SegmentTable<Node<u64, Option<V>>>) -> Self {
        let list = List::new();
        let guard = &crossbeam_epoch::pin();
        // An empty list cannot reject its first key.
        let _ = list.harris_insert(sentinel_key(0), None, guard);
        Self {
            list,
            buckets,
            size: AtomicUsize::new(2),
            count: AtomicUsize::new(0),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current number of buckets.
    pub fn buckets(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Iterates over every entry as `(key, value)`, in split order.
    ///
    /// Walks the whole physical list from bucket 0, so every entry present for the duration of
    /// the walk is seen exactly once, whichever buckets have been materialized.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Entries<'g, V> {
        Entries {
            inner: self.list.iter(guard),
        }
    }

    /// Iterates over the entries that share `key`'s bucket.
    pub fn bucket<'g>(
        &'g self,
        key: u64,
        guard: &'g Guard,
    ) -> impl Iterator<Item = (u64, &'g V)> + 'g {
        let size = self.size.load(Ordering::Acquire);
        let index = (key % size as u64) as usize;
        let (served, head) = self.bucket_head(index, guard);

        // Everything below `served` in the split tree, including sentinels of buckets split off
        // after `size` was read, is one contiguous run after its sentinel. The run may hold other
        // buckets' entries (a child published by a racing grow, or siblings when `served` is an
        // ancestor), so filter by index.
        let mask = subtree_mask(served);
        head.successors(guard)
            .take_while(move |(k, _)| k.reverse_bits() & mask == served as u64)
            .filter_map(|(k, v)| v.as_ref().map(|v| (natural_key(*k), v)))
            .filter(move |(k, _)| (k % size as u64) as usize == index)
    }

    /// Destroys the map. Refused with `NotEmpty` while any entry remains.
    pub fn destroy(self) -> Result<(), Rejected<Self>> {
        if !self.is_empty() {
            return Err(Rejected::new(Error::NotEmpty, self));
        }
        drop(self);
        Ok(())
    }

    /// Bucket 0's sentinel: the first node, never deleted.
    fn first<'g>(&'g self, guard: &'g Guard) -> &'g Node<u64, Option<V>> {
        unsafe { self.list.head(guard).curr().deref() }
    }

    fn published<'g>(&'g self, index: usize, guard: &'g Guard) -> Option<&'g Node<u64, Option<V>>> {
        if index == 0 {
            return Some(self.first(guard));
        }
        let slot = self.buckets.get(index, guard)?;
        unsafe { slot.load(Ordering::Acquire, guard).as_ref() }
    }

    /// Returns the sentinel for bucket `index`, materializing it and any missing ancestors first.
    ///
    /// If some bucket on the way cannot be published, returns its nearest published ancestor
    /// instead. The first element is the index of the bucket actually returned.
    fn bucket_head<'g>(
        &'g self,
        index: usize,
        guard: &'g Guard,
    ) -> (usize, &'g Node<u64, Option<V>>) {
        let mut missing = Vec::new();
        let mut ancestor = index;
        let mut head = loop {
            if let Some(node) = self.published(ancestor, guard) {
                break node;
            }
            missing.push(ancestor);
            ancestor = parent(ancestor);
        };

        while let Some(index) = missing.pop() {
            match self.initialize_bucket(index, head, guard) {
                Some(node) => {
                    head = node;
                    ancestor = index;
                }
                None => break,
            }
        }
        (ancestor, head)
    }

    /// Links the sentinel for `index` into `parent`'s chain (or adopts the one a racing thread
    /// linked) and publishes it. Returns `None` if the slot cannot be allocated.
    fn initialize_bucket<'g>(
        &'g self,
        index: usize,
        parent: &'g Node<u64, Option<V>>,
        guard: &'g Guard,
    ) -> Option<&'g Node<u64, Option<V>>> {
        let slot = match self.buckets.get_or_alloc(index, guard) {
            Ok(slot) => slot,
            Err(e) => {
                warn!(bucket = index, error = %e, "bucket not materialized, serving from parent");
                return None;
            }
        };

        let key = sentinel_key(index);
        let mut node = Owned::new(Node::new(key, None));
        let sentinel = loop {
            let mut cursor = Cursor::after(parent, guard);
            match cursor.find_harris(&key, guard) {
                Err(()) => continue,
                Ok(true) => break cursor.curr(),
                Ok(false) => match cursor.insert(node, guard) {
                    Ok(()) => break cursor.curr(),
                    Err(n) => node = n,
                },
            }
        };

        slot.store(sentinel, Ordering::Release);
        Some(unsafe { sentinel.deref() })
    }

    /// Moves a cursor from `key`'s bucket sentinel to the position of `key`.
    /// Returns `(size, found, cursor)`.
    fn find<'g>(&'g self, key: u64, guard: &'g Guard) -> (usize, bool, Cursor<'g, u64, Option<V>>) {
        let size = self.size.load(Ordering::Acquire);
        let (_, head) = self.bucket_head((key % size as u64) as usize, guard);
        let key = regular_key(key);
        loop {
            let mut cursor = Cursor::after(head, guard);
            if let Ok(found) = cursor.find_harris(&key, guard) {
                return (size, found, cursor);
            }
        }
    }

    fn grow(&self, size: usize, count: usize) {
        if size / count >= Self::LOAD_FACTOR {
            return;
        }
        let Some(doubled) = size.checked_mul(2) else {
            return;
        };
        if self
            .size
            .compare_exchange(size, doubled, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            trace!(buckets = doubled, entries = count, "doubled bucket count");
        }
    }

    fn check_key(key: u64) -> Result<(), Error> {
        if key & HI_BIT != 0 {
            return Err(Error::InvalidArgument(format!(
                "key {key:#x} does not fit in 63 bits"
            )));
        }
        Ok(())
    }
}

impl<V> NonblockingMap<u64, V> for SplitOrderedList<V> {
    fn lookup<'a>(&'a self, key: &u64, guard: &'a Guard) -> Option<&'a V> {
        Self::check_key(*key).ok()?;
        match self.find(*key, guard) {
            (_, true, cursor) => cursor.lookup()?.as_ref(),
            _ => None,
        }
    }

    fn insert(&self, key: &u64, value: V, guard: &Guard) -> Result<(), Rejected<V>> {
        if let Err(e) = Self::check_key(*key) {
            return Err(Rejected::new(e, value));
        }

        let mut node = Owned::new(Node::new(regular_key(*key), Some(value)));
        loop {
            let (size, found, mut cursor) = self.find(*key, guard);
            if found {
                return Err(Rejected::new(Error::AlreadyExists, payload(node)));
            }
            match cursor.insert(node, guard) {
                Ok(()) => {
                    let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
                    self.grow(size, count);
                    return Ok(());
                }
                Err(n) => node = n,
            }
        }
    }

    fn delete<'a>(&'a self, key: &u64, guard: &'a Guard) -> Result<&'a V, Error> {
        Self::check_key(*key)?;
        loop {
            let (_, found, cursor) = self.find(*key, guard);
            if !found {
                return Err(Error::NotFound);
            }
            if let Ok(value) = cursor.delete(guard) {
                self.count.fetch_sub(1, Ordering::Relaxed);
                return value.as_ref().ok_or(Error::NotFound);
            }
        }
    }
}

/// Iterator over the entries of a [`SplitOrderedList`].
#[derive(Debug)]
pub struct Entries<'g, V> {
    inner: Iter<'g, u64, Option<V>>,
}

impl<'g, V> Iterator for Entries<'g, V> {
    type Item = (u64, &'g V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .by_ref()
            .find_map(|(k, v)| v.as_ref().map(|v| (natural_key(*k), v)))
    }
}

fn regular_key(key: u64) -> u64 {
    (key | HI_BIT).reverse_bits()
}

fn sentinel_key(index: usize) -> u64 {
    (index as u64).reverse_bits()
}

fn natural_key(ordering_key: u64) -> u64 {
    ordering_key.reverse_bits() & !HI_BIT
}

/// Mask of the low bits that every descendant of bucket `index` shares with `index`.
fn subtree_mask(index: usize) -> u64 {
    let bits = usize::BITS - index.leading_zeros();
    (1u64 << bits) - 1
}

/// `index` with its highest set bit cleared. `index` must be nonzero.
fn parent(index: usize) -> usize {
    let top = usize::BITS - 1 - index.leading_zeros();
    index & !(1 << top)
}

fn payload<V>(node: Owned<Node<u64, Option<V>>>) -> V {
    match node.into_box().into_value() {
        Some(value) => value,
        None => unreachable!("regular node without payload"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_epoch::pin;

    #[test]
    fn ordering_keys_interleave_sentinels_and_entries() {
        // bucket 1's sentinel sorts after every key of bucket 0 and before every key of bucket 1.
        assert!(regular_key(2) < sentinel_key(1));
        assert!(sentinel_key(1) < regular_key(1));
        assert!(sentinel_key(0) < regular_key(0));
        assert_eq!(regular_key(5) & 1, 1);
        assert_eq!(sentinel_key(5) & 1, 0);
        assert_eq!(natural_key(regular_key(12345)), 12345);
    }

    #[test]
    fn parent_clears_top_bit() {
        assert_eq!(parent(1), 0);
        assert_eq!(parent(2), 0);
        assert_eq!(parent(3), 1);
        assert_eq!(parent(6), 2);
        assert_eq!(parent(13), 5);
    }

    #[test]
    fn insert_lookup_delete() {
        let map = SplitOrderedList::new();
        let guard = &pin();
        assert!(map.insert(&7, "seven", guard).is_ok());
        assert_eq!(map.lookup(&7, guard), Some(&"seven"));

        let dup = map.insert(&7, "again", guard).unwrap_err();
        assert!(matches!(dup.kind, Error::AlreadyExists));
        assert_eq!(dup.into_inner(), "again");

        assert_eq!(map.delete(&7, guard).ok(), Some(&"seven"));
        assert!(matches!(map.delete(&7, guard), Err(Error::NotFound)));
        assert_eq!(map.lookup(&7, guard), None);
        assert!(map.is_empty());
    }

    #[test]
    fn rejects_keys_using_the_top_bit() {
        let map = SplitOrderedList::new();
        let guard = &pin();
        let err = map.insert(&HI_BIT, 1, guard).unwrap_err();
        assert!(matches!(err.kind, Error::InvalidArgument(_)));
        assert_eq!(map.lookup(&u64::MAX, guard), None);
        assert!(matches!(
            map.delete(&HI_BIT, guard),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn buckets_partition_entries() {
        let map = SplitOrderedList::new();
        let guard = &pin();
        for k in 0..64u64 {
            map.insert(&k, k, guard).unwrap();
        }
        let size = map.buckets() as u64;
        assert!(size > 2);

        let mut total = 0;
        for index in 0..size {
            for (k, v) in map.bucket(index, guard) {
                assert_eq!(k % size, index);
                assert_eq!(k, *v);
                total += 1;
            }
        }
        assert_eq!(total, 64);
    }

    #[test]
    fn subtree_mask_covers_descendants() {
        assert_eq!(subtree_mask(0), 0);
        assert_eq!(subtree_mask(1), 0b1);
        assert_eq!(subtree_mask(5), 0b111);
        // 13 = 0b1101 descends from 5 = 0b101 but not from 3 = 0b11.
        assert_eq!(13 & subtree_mask(5), 5);
        assert_ne!(13 & subtree_mask(3), 3);
    }

    #[test]
    fn bucket_walk_survives_concurrent_split() {
        let map = SplitOrderedList::new();
        let guard = &pin();
        map.insert(&1, 1, guard).unwrap();
        assert_eq!(map.buckets(), 2);

        // Taken under two buckets, before bucket 3 splits off bucket 1.
        let entries = map.bucket(1, guard);

        map.insert(&3, 3, guard).unwrap();
        map.size.store(4, Ordering::Release);
        assert_eq!(map.lookup(&3, guard), Some(&3));
        assert!(map.published(3, guard).is_some());

        let mut keys: Vec<u64> = entries.map(|(k, _)| k).collect();
        keys.sort_unstable();
        assert_eq!(keys, [1, 3]);
    }

    #[test]
    fn unpublished_buckets_are_served_by_ancestors() {
        // Only buckets 0 and 1 can get a sentinel.
        let map = SplitOrderedList::with_segment_limit(1);
        let guard = &pin();
        for k in 0..256u64 {
            map.insert(&k, k, guard).unwrap();
        }
        let size = map.buckets() as u64;
        assert!(size > 2);
        assert!(map.published(2, guard).is_none());

        for k in 0..256u64 {
            assert_eq!(map.lookup(&k, guard), Some(&k));
        }

        let mut total = 0;
        for index in 0..size {
            let mut keys: Vec<u64> = map.bucket(index, guard).map(|(k, _)| k).collect();
            keys.sort_unstable();
            let expected: Vec<u64> = (0..256u64).filter(|k| k % size == index).collect();
            assert_eq!(keys, expected);
            total += keys.len();
        }
        assert_eq!(total, 256);

        for k in (0..256u64).step_by(3) {
            assert_eq!(map.delete(&k, guard).ok(), Some(&k));
        }
        assert_eq!(map.lookup(&3, guard), None);
        assert_eq!(map.lookup(&4, guard), Some(&4));
        assert_eq!(map.iter(guard).count(), 256 - 86);
    }

    #[test]
    fn iter_sees_every_entry_once() {
        let map = SplitOrderedList::new();
        let guard = &pin();
        for k in (0..500u64).rev() {
            map.insert(&k, k * 2, guard).unwrap();
        }
        map.delete(&100, guard).unwrap();

        let mut keys: Vec<u64> = map.iter(guard).map(|(k, v)| {
            assert_eq!(*v, k * 2);
            k
        }).collect();
        keys.sort_unstable();
        assert_eq!(keys.len(), 499);
        assert!(!keys.contains(&100));
    }

    #[test]
    fn destroy_refuses_while_not_empty() {
        let map = SplitOrderedList::new();
        map.insert(&1, (), &pin()).unwrap();

        let rejected = map.destroy().unwrap_err();
        assert!(matches!(rejected.kind, Error::NotEmpty));
        let map = rejected.into_inner();
        assert_eq!(map.lookup(&1, &pin()), Some(&()));

        map.delete(&1, &pin()).unwrap();
        assert!(map.destroy().is_ok());
    }
}
