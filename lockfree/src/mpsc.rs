//! Multi-producer single-consumer queue.
//!
//! Same linked structure as [`Queue`], but the consumer half is a unique handle, so dequeue never
//! has to race another reader for `head`: it advances it with a plain store.

use std::fmt;
use std::sync::Arc;

use crossbeam_epoch as epoch;

use crate::Queue;

/// Creates a queue, returning its producer and consumer halves.
pub fn queue<T>() -> (Producer<T>, Consumer<T>) {
    let inner = Arc::new(Queue::new());
    (
        Producer {
            inner: Arc::clone(&inner),
        },
        Consumer { inner },
    )
}

/// Producer half. Clone it to add producers.
pub struct Producer<T> {
    inner: Arc<Queue<T>>,
}

/// Consumer half. There is exactly one per queue.
pub struct Consumer<T> {
    inner: Arc<Queue<T>>,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Producer<T> {
    /// Adds `value` to the back of the queue.
    pub fn enqueue(&self, value: T) {
        self.inner.enqueue(value, &epoch::pin());
    }
}

impl<T> Consumer<T> {
    /// Removes the front element, or returns `None` if the queue is empty.
    pub fn dequeue(&mut self) -> Option<T> {
        let guard = &epoch::pin();
        // SAFETY: `Consumer` is not `Clone` and `dequeue` takes `&mut self`, so this is the only
        // thread dequeuing.
        unsafe { self.inner.dequeue_exclusive(guard) }
    }

    /// Returns `true` if the queue is observed to be empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty(&epoch::pin())
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Producer { .. }")
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Consumer { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_utils::thread;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    assert_impl_all!(Producer<String>: Send, Sync, Clone);
    assert_impl_all!(Consumer<String>: Send);
    assert_not_impl_any!(Consumer<String>: Clone);

    const PRODUCERS: usize = 8;
    const ELEMENTS_PER_PRODUCER: usize = 5_000;

    #[test]
    fn every_marker_exactly_once() {
        let (tx, mut rx) = queue();

        thread::scope(|s| {
            for t in 0..PRODUCERS {
                let tx = tx.clone();
                s.spawn(move |_| {
                    for i in 0..ELEMENTS_PER_PRODUCER {
                        tx.enqueue(t * ELEMENTS_PER_PRODUCER + i);
                    }
                });
            }

            s.spawn(move |_| {
                let mut seen = vec![false; PRODUCERS * ELEMENTS_PER_PRODUCER];
                let mut received = 0;
                while received < seen.len() {
                    if let Some(v) = rx.dequeue() {
                        assert!(!seen[v], "marker {} delivered twice", v);
                        seen[v] = true;
                        received += 1;
                    }
                }
                assert_eq!(rx.dequeue(), None);
                assert!(rx.is_empty());
            });
        })
        .unwrap();
    }

    #[test]
    fn consumer_outlives_producers() {
        let (tx, mut rx) = queue();
        tx.enqueue(1);
        tx.enqueue(2);
        drop(tx);
        assert_eq!(rx.dequeue(), Some(1));
        assert_eq!(rx.dequeue(), Some(2));
        assert_eq!(rx.dequeue(), None);
    }
}
