//! Append-only lock-free bag.
//!
//! Elements are pushed Treiber-style onto the front of a singly linked list and are never removed
//! before the bag is dropped, so iteration needs no reclamation scheme: a node, once published,
//! lives as long as the bag.

use core::fmt;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Unordered collection supporting concurrent `push` and iteration.
pub struct Bag<T> {
    head: AtomicPtr<Node<T>>,
    len: AtomicUsize,
}

struct Node<T> {
    value: T,
    /// Immutable once the node is published.
    next: *mut Node<T>,
}

unsafe impl<T: Send> Send for Bag<T> {}
unsafe impl<T: Send + Sync> Sync for Bag<T> {}

impl<T> Default for Bag<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Bag<T> {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            len: AtomicUsize::new(0),
        }
    }

    /// Adds `value` to the bag.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value,
            next: ptr::null_mut(),
        }));
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).next = head };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }
        self.len.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of elements pushed so far.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns `true` if nothing has been pushed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over the elements published before the call, most recent first.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            curr: self.head.load(Ordering::Acquire),
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Bag<T> {
    fn drop(&mut self) {
        let mut curr = *self.head.get_mut();
        while !curr.is_null() {
            let node = unsafe { Box::from_raw(curr) };
            curr = node.next;
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Bag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over a [`Bag`].
pub struct Iter<'a, T> {
    curr: *const Node<T>,
    _marker: PhantomData<&'a T>,
}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Self {
            curr: self.curr,
            _marker: PhantomData,
        }
    }
}

unsafe impl<T: Sync> Send for Iter<'_, T> {}
unsafe impl<T: Sync> Sync for Iter<'_, T> {}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let node = unsafe { self.curr.as_ref() }?;
        self.curr = node.next;
        Some(&node.value)
    }
}

impl<T> fmt::Debug for Iter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Iter { .. }")
    }
}

impl<'a, T> IntoIterator for &'a Bag<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_utils::thread;

    #[test]
    fn iterates_most_recent_first() {
        let bag = Bag::new();
        assert!(bag.is_empty());
        for i in 0..5 {
            bag.push(i);
        }
        assert_eq!(bag.len(), 5);
        assert_eq!(bag.iter().copied().collect::<Vec<_>>(), vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn concurrent_push_keeps_everything() {
        let bag = &Bag::new();
        thread::scope(|s| {
            for t in 0..8 {
                s.spawn(move |_| {
                    for i in 0..1_000 {
                        bag.push(t * 1_000 + i);
                    }
                });
            }
            // Readers walk a consistent prefix while writers are active.
            s.spawn(move |_| {
                for _ in 0..100 {
                    let n = bag.iter().count();
                    assert!(n <= 8_000);
                }
            });
        })
        .unwrap();

        let mut all: Vec<usize> = bag.iter().copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..8_000).collect::<Vec<_>>());
        assert_eq!(bag.len(), 8_000);
    }
}
