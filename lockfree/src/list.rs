//! Lock-free singly linked list sorted by key.
//!
//! Harris's list: a node is logically deleted by setting the mark (tag bit 1) of its `next`
//! pointer, and physically unlinked by whichever thread next walks past it. Unlinked nodes are
//! retired through the epoch collector, so a node stays readable for as long as any thread that
//! could have observed it is still pinned.
//!
//! The list exposes a [`Cursor`] so that callers can start a search from any unmarked node they
//! already hold instead of the head. The split-ordered hash table relies on this: its buckets are
//! sentinel nodes in one shared list.

use core::cmp::Ordering::{Equal, Greater, Less};
use core::sync::atomic::Ordering;

use crossbeam_epoch::{unprotected, Atomic, Guard, Owned, Shared};

/// List node.
#[derive(Debug)]
pub struct Node<K, V> {
    key: K,
    value: V,
    /// Mark: tag(), Tag: not needed
    next: Atomic<Node<K, V>>,
}

/// Sorted lock-free list.
#[derive(Debug)]
pub struct List<K, V> {
    head: Atomic<Node<K, V>>,
}

/// Position in a list: `curr` is the node `prev` pointed to when it was last read.
#[derive(Debug)]
pub struct Cursor<'g, K, V> {
    prev: &'g Atomic<Node<K, V>>,
    curr: Shared<'g, Node<K, V>>,
}

impl<K, V> Node<K, V> {
    /// Creates a new node.
    pub fn new(key: K, value: V) -> Self {
        Self {
            key,
            value,
            next: Atomic::null(),
        }
    }

    /// Returns the key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns the value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Extracts the value.
    pub fn into_value(self) -> V {
        self.value
    }

    /// Returns `true` if the node has been logically deleted.
    pub fn is_marked(&self, guard: &Guard) -> bool {
        self.next.load(Ordering::Acquire, guard).tag() != 0
    }

    /// Iterates over the live nodes following this one.
    pub fn successors<'g>(&'g self, guard: &'g Guard) -> Iter<'g, K, V> {
        Iter {
            curr: self.next.load(Ordering::Acquire, guard).with_tag(0),
            guard,
        }
    }
}

impl<'g, K, V> Cursor<'g, K, V> {
    /// Creates a cursor positioned right after `node`.
    ///
    /// `node` must never be deleted while the cursor is in use (e.g. a sentinel). A cursor that
    /// starts on a marked node can never insert.
    pub fn after(node: &'g Node<K, V>, guard: &'g Guard) -> Self {
        Self {
            prev: &node.next,
            curr: node.next.load(Ordering::Acquire, guard).with_tag(0),
        }
    }

    /// Returns the current node.
    pub fn curr(&self) -> Shared<'g, Node<K, V>> {
        self.curr
    }

    /// Returns the value of the current node, or `None` at the end of the list.
    pub fn lookup(&self) -> Option<&'g V> {
        unsafe { self.curr.as_ref() }.map(|node| &node.value)
    }
}

impl<'g, K: Ord, V> Cursor<'g, K, V> {
    /// Moves the cursor to the first unmarked node whose key is not less than `key`, unlinking
    /// the marked nodes it skips on the way. Returns whether that node's key equals `key`.
    ///
    /// Returns `Err(())` if the neighbourhood changed under us; the cursor must then be rebuilt.
    pub fn find_harris(&mut self, key: &K, guard: &'g Guard) -> Result<bool, ()> {
        // What `*prev` held when the cursor stepped onto it. Differs from `curr` iff marked nodes
        // were skipped in between.
        let mut prev_next = self.curr;

        let found = loop {
            let curr_node = match unsafe { self.curr.as_ref() } {
                None => break false,
                Some(c) => c,
            };
            let next = curr_node.next.load(Ordering::Acquire, guard);

            if next.tag() != 0 {
                self.curr = next.with_tag(0);
                continue;
            }

            match curr_node.key.cmp(key) {
                Less => {
                    self.prev = &curr_node.next;
                    prev_next = next;
                    self.curr = next;
                }
                Equal => break true,
                Greater => break false,
            }
        };

        if prev_next == self.curr {
            return Ok(found);
        }

        // 1 -> 2 -x-> 3 -x-> 4: swing prev past the marked run in one CAS.
        self.prev
            .compare_exchange(
                prev_next,
                self.curr,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            )
            .map_err(|_| ())?;

        let mut node = prev_next;
        while node != self.curr {
            let next = unsafe { node.deref() }.next.load(Ordering::Relaxed, guard);
            unsafe { guard.defer_destroy(node) };
            node = next.with_tag(0);
        }
        Ok(found)
    }

    /// Links `node` in front of the current node. On success the cursor points at the new node.
    ///
    /// Fails (handing `node` back) if `prev` no longer points at the current node.
    pub fn insert(
        &mut self,
        node: Owned<Node<K, V>>,
        guard: &'g Guard,
    ) -> Result<(), Owned<Node<K, V>>> {
        node.next.store(self.curr, Ordering::Relaxed);
        match self.prev.compare_exchange(
            self.curr,
            node,
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        ) {
            Ok(node) => {
                self.curr = node;
                Ok(())
            }
            Err(e) => Err(e.new),
        }
    }

    /// Logically deletes the current node, then tries once to unlink it.
    ///
    /// Fails if another thread marked the node first. If the unlink loses its race the node
    /// stays marked and the next traversal through it removes it.
    pub fn delete(self, guard: &'g Guard) -> Result<&'g V, ()> {
        let curr_node = unsafe { self.curr.as_ref() }.ok_or(())?;

        let next = curr_node.next.fetch_or(1, Ordering::AcqRel, guard);
        if next.tag() != 0 {
            return Err(());
        }

        if self
            .prev
            .compare_exchange(self.curr, next, Ordering::AcqRel, Ordering::Acquire, guard)
            .is_ok()
        {
            unsafe { guard.defer_destroy(self.curr) };
        }

        Ok(&curr_node.value)
    }
}

impl<K, V> Default for List<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> List<K, V> {
    /// Creates a new list.
    pub fn new() -> Self {
        Self {
            head: Atomic::null(),
        }
    }

    /// Creates a cursor at the head of the list.
    pub fn head<'g>(&'g self, guard: &'g Guard) -> Cursor<'g, K, V> {
        Cursor {
            prev: &self.head,
            curr: self.head.load(Ordering::Acquire, guard),
        }
    }

    /// Iterates over the live nodes of the list.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, K, V> {
        Iter {
            curr: self.head.load(Ordering::Acquire, guard),
            guard,
        }
    }
}

impl<K: Ord, V> List<K, V> {
    /// Returns `(found, cursor)` for `key`, retrying until the search is undisturbed.
    pub fn harris_find<'g>(&'g self, key: &K, guard: &'g Guard) -> (bool, Cursor<'g, K, V>) {
        loop {
            let mut cursor = self.head(guard);
            if let Ok(found) = cursor.find_harris(key, guard) {
                return (found, cursor);
            }
        }
    }

    /// Looks up `key`.
    pub fn harris_lookup<'g>(&'g self, key: &K, guard: &'g Guard) -> Option<&'g V> {
        match self.harris_find(key, guard) {
            (true, cursor) => cursor.lookup(),
            (false, _) => None,
        }
    }

    /// Inserts `key`. Returns the value back if the key is already present.
    pub fn harris_insert(&self, key: K, value: V, guard: &Guard) -> Result<(), V> {
        let mut node = Owned::new(Node::new(key, value));
        loop {
            let (found, mut cursor) = self.harris_find(&node.key, guard);
            if found {
                return Err(node.into_box().into_value());
            }
            match cursor.insert(node, guard) {
                Ok(()) => return Ok(()),
                Err(n) => node = n,
            }
        }
    }

    /// Deletes `key`, returning a reference to its value that stays valid while `guard` lives.
    pub fn harris_delete<'g>(&'g self, key: &K, guard: &'g Guard) -> Result<&'g V, ()> {
        loop {
            let (found, cursor) = self.harris_find(key, guard);
            if !found {
                return Err(());
            }
            if let Ok(value) = cursor.delete(guard) {
                return Ok(value);
            }
        }
    }
}

impl<K, V> Drop for List<K, V> {
    fn drop(&mut self) {
        unsafe {
            let guard = unprotected();
            let mut curr = self.head.load(Ordering::Relaxed, guard);
            while !curr.is_null() {
                let next = curr.deref().next.load(Ordering::Relaxed, guard);
                drop(curr.into_owned());
                curr = next.with_tag(0);
            }
        }
    }
}

/// Iterator over the live `(key, value)` pairs of a list.
#[derive(Debug)]
pub struct Iter<'g, K, V> {
    curr: Shared<'g, Node<K, V>>,
    guard: &'g Guard,
}

impl<'g, K, V> Iterator for Iter<'g, K, V> {
    type Item = (&'g K, &'g V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = unsafe { self.curr.as_ref() }?;
            let next = node.next.load(Ordering::Acquire, self.guard);
            self.curr = next.with_tag(0);
            if next.tag() == 0 {
                return Some((&node.key, &node.value));
            }
        }
    }
}
