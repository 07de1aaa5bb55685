//! Thread pool behaviour: barriers, pause/resume and shutdown guards.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lsdup::{Error, Handle, ThreadPool, ThreadPoolBuilder};

#[test]
fn burst_side_effects_are_complete_after_wait_idle() {
    let pool = ThreadPool::new(4).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..1_000 {
        let counter = Arc::clone(&counter);
        pool.execute(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    pool.wait_idle();
    assert_eq!(pool.enqueued_tasks(), 0);
    assert_eq!(counter.load(Ordering::SeqCst), 1_000);
}

fn fan_out(handle: Handle, depth: u32, counter: Arc<AtomicUsize>) {
    counter.fetch_add(1, Ordering::SeqCst);
    if depth == 0 {
        return;
    }
    for _ in 0..2 {
        let (h, c) = (handle.clone(), Arc::clone(&counter));
        // Give the submitter a chance to be observed mid-task.
        thread::yield_now();
        handle.execute(move || fan_out(h, depth - 1, c)).unwrap();
    }
}

#[test]
fn wait_idle_covers_tasks_submitted_by_tasks() {
    let pool = ThreadPool::new(4).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    let (handle, c) = (pool.handle(), Arc::clone(&counter));
    pool.execute(move || fan_out(handle, 10, c)).unwrap();
    pool.wait_idle();

    // A full binary tree of depth 10.
    assert_eq!(counter.load(Ordering::SeqCst), (1 << 11) - 1);
}

#[test]
fn paused_pool_runs_nothing_until_resumed() {
    let pool = ThreadPool::new(3).unwrap();
    pool.pause();
    // Let every worker finish its current poll and block.
    thread::sleep(Duration::from_millis(50));

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..100 {
        let counter = Arc::clone(&counter);
        pool.execute(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    thread::sleep(Duration::from_millis(50));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(pool.enqueued_tasks(), 100);

    pool.resume();
    pool.wait_idle();
    assert_eq!(counter.load(Ordering::SeqCst), 100);
}

#[test]
fn destroy_refuses_while_work_remains() {
    let pool = ThreadPool::new(2).unwrap();
    pool.pause();
    thread::sleep(Duration::from_millis(20));
    pool.execute(|| ()).unwrap();

    let rejected = pool.destroy().unwrap_err();
    assert!(matches!(rejected.kind, Error::NotEmpty));

    let pool = rejected.into_inner();
    pool.resume();
    pool.wait_quiescent();
    assert!(pool.is_quiescent());
    assert!(pool.destroy().is_ok());
}

#[test]
fn idle_counter_reaches_thread_count() {
    let pool = ThreadPoolBuilder::new()
        .threads(3)
        .idle_poll(Duration::from_micros(200))
        .build()
        .unwrap();
    pool.wait_quiescent();
    assert_eq!(pool.threads(), 3);
    assert_eq!(pool.idle_threads(), 3);
}

#[test]
fn panicking_task_does_not_kill_workers() {
    let pool = ThreadPool::new(2).unwrap();
    for _ in 0..10 {
        pool.execute(|| panic!("task failure")).unwrap();
    }
    pool.wait_idle();

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let counter = Arc::clone(&counter);
        pool.execute(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    pool.wait_quiescent();
    assert_eq!(counter.load(Ordering::SeqCst), 10);
    assert_eq!(pool.idle_threads(), 2);
}

/// Counts how many of the tasks that captured it were freed.
struct DropCount(Arc<AtomicUsize>);

impl Drop for DropCount {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn tasks_racing_shutdown_are_freed() {
    const SUBMITTERS: usize = 4;
    const TASKS: usize = 2_000;

    let pool = ThreadPool::new(2).unwrap();
    pool.pause();
    let freed = Arc::new(AtomicUsize::new(0));

    let submitters: Vec<_> = (0..SUBMITTERS)
        .map(|_| {
            let (handle, freed) = (pool.handle(), Arc::clone(&freed));
            thread::spawn(move || {
                for _ in 0..TASKS {
                    // Each task keeps the pool's shared state alive while it sits in the queue.
                    let (h, count) = (handle.clone(), DropCount(Arc::clone(&freed)));
                    let _ = handle.execute(move || drop((h, count)));
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(1));
    drop(pool);
    for submitter in submitters {
        submitter.join().unwrap();
    }

    assert_eq!(freed.load(Ordering::SeqCst), SUBMITTERS * TASKS);
    assert_eq!(Arc::strong_count(&freed), 1);
}
