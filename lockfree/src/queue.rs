//! Michael-Scott lock-free queue.
//!
//! Usable with any number of producers and consumers.
//!
//! Michael and Scott.  Simple, Fast, and Practical Non-Blocking and Blocking Concurrent Queue
//! Algorithms.  PODC 1996.  <http://dl.acm.org/citation.cfm?id=248106>

use core::mem::MaybeUninit;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_epoch::{unprotected, Atomic, Guard, Owned, Shared};
use crossbeam_utils::{Backoff, CachePadded};

// A singly-linked list with a sentinel node at the front. `head` is the node most recently
// dequeued (its slot is already empty); `tail` lags behind the last node by at most one
// enqueue in progress.
#[derive(Debug)]
pub struct Queue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
}

#[derive(Debug)]
struct Node<T> {
    /// Initialized from enqueue until the node becomes the sentinel. The sentinel's slot is
    /// always empty: its value was moved out by the dequeue that made it the head.
    data: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

// Any particular `T` is only ever handed to one thread, so no need for `T: Sync`.
unsafe impl<T: Send> Sync for Queue<T> {}
unsafe impl<T: Send> Send for Queue<T> {}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    /// Creates a new, empty queue.
    pub fn new() -> Self {
        let sentinel = Owned::new(Node {
            data: MaybeUninit::uninit(),
            next: Atomic::null(),
        });
        unsafe {
            let sentinel = sentinel.into_shared(unprotected());
            Self {
                head: CachePadded::new(Atomic::from(sentinel)),
                tail: CachePadded::new(Atomic::from(sentinel)),
            }
        }
    }

    /// Adds `t` to the back of the queue.
    pub fn enqueue(&self, t: T, guard: &Guard) {
        let new = Owned::new(Node {
            data: MaybeUninit::new(t),
            next: Atomic::null(),
        })
        .into_shared(guard);
        let backoff = Backoff::new();

        loop {
            let tail = self.tail.load(Acquire, guard);
            let tail_node = unsafe { tail.deref() };
            let next = tail_node.next.load(Acquire, guard);

            // Someone advanced the tail since we read it.
            if tail != self.tail.load(Acquire, guard) {
                continue;
            }

            if next.is_null() {
                // Link first, then publish. Losing the publish is fine: the next operation to
                // see the lagging tail swings it for us.
                if tail_node
                    .next
                    .compare_exchange(Shared::null(), new, Release, Relaxed, guard)
                    .is_ok()
                {
                    let _ = self.tail.compare_exchange(tail, new, Release, Relaxed, guard);
                    return;
                }
            } else {
                let _ = self.tail.compare_exchange(tail, next, Release, Relaxed, guard);
            }
            backoff.spin();
        }
    }

    /// Removes the front element, or returns `None` if the queue is observed to be empty.
    pub fn dequeue(&self, guard: &Guard) -> Option<T> {
        let backoff = Backoff::new();

        loop {
            let head = self.head.load(Acquire, guard);
            let tail = self.tail.load(Acquire, guard);
            let next = unsafe { head.deref() }.next.load(Acquire, guard);

            if head != self.head.load(Acquire, guard) {
                continue;
            }

            match unsafe { next.as_ref() } {
                None => return None,
                Some(_) if head == tail => {
                    // Tail is lagging: help it past the node we are about to retire.
                    let _ = self.tail.compare_exchange(tail, next, Release, Relaxed, guard);
                }
                Some(n) => {
                    if self
                        .head
                        .compare_exchange(head, next, Release, Relaxed, guard)
                        .is_ok()
                    {
                        unsafe {
                            guard.defer_destroy(head);
                            return Some(n.data.as_ptr().read());
                        }
                    }
                }
            }
            backoff.spin();
        }
    }

    /// Removes the front element without racing other consumers.
    ///
    /// # Safety
    ///
    /// The caller must be the only thread that ever dequeues from this queue.
    pub(crate) unsafe fn dequeue_exclusive(&self, guard: &Guard) -> Option<T> {
        // Only this thread writes `head`.
        let head = self.head.load(Relaxed, guard);
        let next = head.deref().next.load(Acquire, guard);
        let n = next.as_ref()?;

        // Producers may still be reading `head` through a stale tail. Make sure the tail is past
        // it before retiring; if the CAS fails someone else already moved it forward.
        let tail = self.tail.load(Acquire, guard);
        if tail == head {
            let _ = self.tail.compare_exchange(tail, next, Release, Relaxed, guard);
        }

        self.head.store(next, Release);
        guard.defer_destroy(head);
        Some(n.data.as_ptr().read())
    }

    /// Returns `true` if the queue is observed to be empty.
    pub fn is_empty(&self, guard: &Guard) -> bool {
        let head = self.head.load(Acquire, guard);
        unsafe { head.deref() }.next.load(Acquire, guard).is_null()
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = unprotected();

            while self.dequeue_exclusive(guard).is_some() {}

            // Destroy the remaining sentinel node.
            let sentinel = self.head.load(Relaxed, guard);
            drop(sentinel.into_owned());
        }
    }
}
