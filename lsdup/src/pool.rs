//! Fixed-size thread pool over a lock-free task queue.
//!
//! Workers poll the queue, sleeping for a short interval whenever it is empty. Submitting a task
//! never blocks. Tasks may submit further tasks through a [`Handle`]; completion of a whole
//! fan-out is observed with [`ThreadPool::wait_idle`].

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_epoch as epoch;
use crossbeam_utils::CachePadded;
use lockfree::Queue;
use tracing::{debug, error, info};

use crate::error::{Error, Rejected};

/// Unit of work run by the pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Default sleep between polls of an empty queue.
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(1);

struct Shared {
    queue: Queue<Task>,
    threads: usize,
    idle_poll: Duration,
    /// Tasks submitted and not yet finished. Incremented before a task is queued and decremented
    /// after it returns, so it can only reach zero once a whole fan-out has completed.
    outstanding: CachePadded<AtomicUsize>,
    /// Workers currently polling an empty queue.
    idle: CachePadded<AtomicUsize>,
    stop: AtomicBool,
    paused: Mutex<bool>,
    resumed: Condvar,
    drained_lock: Mutex<()>,
    drained: Condvar,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn submit(&self, task: Task) -> Result<(), Error> {
        if self.stop.load(Ordering::SeqCst) {
            return Err(Error::Stopped);
        }
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.queue.enqueue(task, &epoch::pin());

        // A push that lands after `drop` drained the queue would never run or be freed.
        if self.stop.load(Ordering::SeqCst) {
            let dropped = self.drain();
            debug!(tasks = dropped, "dropped tasks submitted during shutdown");
            return Err(Error::Stopped);
        }
        Ok(())
    }

    /// Drops every queued task without running it. Returns how many were dropped.
    fn drain(&self) -> usize {
        let guard = &epoch::pin();
        let mut dropped = 0;
        while let Some(task) = self.queue.dequeue(guard) {
            drop(task);
            self.finish_task();
            dropped += 1;
        }
        dropped
    }

    fn finish_task(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _guard = lock(&self.drained_lock);
            self.drained.notify_all();
        }
    }

    /// Blocks while the pool is paused. Returns `false` once the pool is stopping.
    fn wait_while_paused(&self) -> bool {
        let mut paused = lock(&self.paused);
        while *paused && !self.stop.load(Ordering::Acquire) {
            paused = self
                .resumed
                .wait(paused)
                .unwrap_or_else(PoisonError::into_inner);
        }
        !self.stop.load(Ordering::Acquire)
    }

    fn run_worker(&self, id: usize) {
        debug!(worker = id, "worker started");
        let mut idle = false;

        while !self.stop.load(Ordering::Acquire) {
            if !self.wait_while_paused() {
                break;
            }

            let task = self.queue.dequeue(&epoch::pin());
            let Some(task) = task else {
                if !idle {
                    idle = true;
                    self.idle.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(self.idle_poll);
                continue;
            };

            if idle {
                idle = false;
                self.idle.fetch_sub(1, Ordering::SeqCst);
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                error!(worker = id, panic = panic_message(&*payload), "task panicked");
            }
            self.finish_task();
        }

        if idle {
            self.idle.fetch_sub(1, Ordering::SeqCst);
        }
        debug!(worker = id, "worker exiting");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

/// Configures and spawns a [`ThreadPool`].
#[derive(Debug, Clone)]
pub struct ThreadPoolBuilder {
    threads: usize,
    idle_poll: Duration,
    name_prefix: String,
}

impl Default for ThreadPoolBuilder {
    fn default() -> Self {
        Self {
            threads: thread::available_parallelism().map_or(1, |n| n.get()),
            idle_poll: DEFAULT_IDLE_POLL,
            name_prefix: "lsdup-worker".to_owned(),
        }
    }
}

impl ThreadPoolBuilder {
    /// Builder with one worker per available core and a 1 ms idle poll.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of worker threads.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// How long an idle worker sleeps before polling the queue again.
    pub fn idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    /// Worker threads are named `<prefix>-<id>`.
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Spawns the workers.
    pub fn build(self) -> Result<ThreadPool, Error> {
        if self.threads == 0 {
            return Err(Error::InvalidArgument(
                "thread pool needs at least one thread".into(),
            ));
        }

        let shared = Arc::new(Shared {
            queue: Queue::new(),
            threads: self.threads,
            idle_poll: self.idle_poll,
            outstanding: CachePadded::new(AtomicUsize::new(0)),
            idle: CachePadded::new(AtomicUsize::new(0)),
            stop: AtomicBool::new(false),
            paused: Mutex::new(false),
            resumed: Condvar::new(),
            drained_lock: Mutex::new(()),
            drained: Condvar::new(),
        });

        // Dropping a partially built pool stops the workers spawned so far.
        let mut pool = ThreadPool {
            shared,
            workers: Vec::with_capacity(self.threads),
        };
        for id in 0..self.threads {
            let shared = Arc::clone(&pool.shared);
            let worker = thread::Builder::new()
                .name(format!("{}-{}", self.name_prefix, id))
                .spawn(move || shared.run_worker(id))
                .map_err(Error::Spawn)?;
            pool.workers.push(worker);
        }

        info!(threads = self.threads, "thread pool started");
        Ok(pool)
    }
}

/// Fixed set of worker threads draining one shared task queue.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

/// Cloneable submission handle. Tasks use it to schedule follow-up work.
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    /// Submits `f` for execution. Fails with `Stopped` once the pool is shutting down.
    pub fn execute<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.submit(Box::new(f))
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Handle { .. }")
    }
}

impl ThreadPool {
    /// Spawns a pool of `threads` workers with default settings.
    pub fn new(threads: usize) -> Result<Self, Error> {
        ThreadPoolBuilder::new().threads(threads).build()
    }

    /// Returns a submission handle.
    pub fn handle(&self) -> Handle {
        Handle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Submits `f` for execution.
    pub fn execute<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.submit(Box::new(f))
    }

    /// Stops workers from starting new tasks. Tasks already running complete normally.
    pub fn pause(&self) {
        *lock(&self.shared.paused) = true;
        debug!("thread pool paused");
    }

    /// Lets paused workers continue.
    pub fn resume(&self) {
        *lock(&self.shared.paused) = false;
        self.shared.resumed.notify_all();
        debug!("thread pool resumed");
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.shared.threads
    }

    /// Tasks submitted and not yet finished, queued or running.
    pub fn enqueued_tasks(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }

    /// Workers currently polling an empty queue.
    pub fn idle_threads(&self) -> usize {
        self.shared.idle.load(Ordering::SeqCst)
    }

    /// Returns `true` if no task is outstanding and every worker is idle.
    ///
    /// This is a snapshot: a task submitted right after it is taken is not reflected.
    pub fn is_quiescent(&self) -> bool {
        self.enqueued_tasks() == 0 && self.idle_threads() == self.shared.threads
    }

    /// Blocks until every submitted task, including tasks submitted by tasks, has finished.
    pub fn wait_idle(&self) {
        let mut guard = lock(&self.shared.drained_lock);
        while self.shared.outstanding.load(Ordering::SeqCst) != 0 {
            guard = self
                .shared
                .drained
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait_idle`](Self::wait_idle), then also waits for every worker to go idle.
    pub fn wait_quiescent(&self) {
        loop {
            self.wait_idle();
            if self.is_quiescent() {
                return;
            }
            thread::sleep(self.shared.idle_poll);
        }
    }

    /// Stops and joins the workers. Refused with `NotEmpty` while tasks are outstanding or a
    /// worker is busy.
    pub fn destroy(self) -> Result<(), Rejected<Self>> {
        if !self.shared.queue.is_empty(&epoch::pin()) || !self.is_quiescent() {
            return Err(Rejected::new(Error::NotEmpty, self));
        }
        drop(self);
        Ok(())
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.threads())
            .field("enqueued_tasks", &self.enqueued_tasks())
            .field("idle_threads", &self.idle_threads())
            .finish()
    }
}

impl Drop for ThreadPool {
    /// Stops the workers and joins them. Tasks still queued are dropped without running.
    fn drop(&mut self) {
        {
            let _paused = lock(&self.shared.paused);
            self.shared.stop.store(true, Ordering::SeqCst);
            self.shared.resumed.notify_all();
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }

        // Queued tasks may hold handles to this pool.
        let dropped = self.shared.drain();
        if dropped > 0 {
            debug!(tasks = dropped, "dropped queued tasks");
        }
        info!("thread pool stopped");
    }
}
