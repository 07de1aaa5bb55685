//! Result writer.
//!
//! Duplicate pairs are reported from any pool thread onto an MPSC queue. A dedicated thread owns
//! the consumer end and writes one line per pair.

use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lockfree::mpsc::{self, Consumer, Producer};
use tracing::{debug, error};

use crate::error::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Cloneable sending side of the writer.
#[derive(Clone, Debug)]
pub struct Reporter {
    producer: Producer<String>,
}

impl Reporter {
    /// Queues the line `"<a> <b>"`.
    pub fn report(&self, a: &Path, b: &Path) {
        self.producer
            .enqueue(format!("{} {}", a.display(), b.display()));
    }
}

/// Thread writing reported lines to an output stream.
#[derive(Debug)]
pub struct Writer {
    producer: Producer<String>,
    done: Arc<AtomicBool>,
    handle: Option<JoinHandle<io::Result<u64>>>,
}

impl Writer {
    /// Spawns the writer thread over `out`.
    pub fn spawn<W>(out: W) -> Result<Self, Error>
    where
        W: Write + Send + 'static,
    {
        let (producer, consumer) = mpsc::queue();
        let done = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&done);
        let handle = thread::Builder::new()
            .name("lsdup-writer".into())
            .spawn(move || write_lines(consumer, out, &flag))
            .map_err(Error::Spawn)?;

        Ok(Self {
            producer,
            done,
            handle: Some(handle),
        })
    }

    /// Returns a reporter feeding this writer.
    pub fn reporter(&self) -> Reporter {
        Reporter {
            producer: self.producer.clone(),
        }
    }

    /// Writes every line reported so far, stops the thread and returns the number of lines
    /// written.
    ///
    /// Reports made after this call starts may be lost.
    pub fn finish(mut self) -> Result<u64, Error> {
        self.done.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return Ok(0);
        };
        match handle.join() {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "writer thread panicked",
            ))),
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if let Ok(Err(e)) = handle.join() {
                error!(error = %e, "result writer failed");
            }
        }
    }
}

fn write_lines<W: Write>(mut consumer: Consumer<String>, out: W, done: &AtomicBool) -> io::Result<u64> {
    let mut out = BufWriter::new(out);
    let mut written = 0u64;

    loop {
        if let Some(line) = consumer.dequeue() {
            writeln!(out, "{line}")?;
            written += 1;
            continue;
        }
        if done.load(Ordering::Acquire) {
            // Everything reported before `finish` is visible now.
            while let Some(line) = consumer.dequeue() {
                writeln!(out, "{line}")?;
                written += 1;
            }
            break;
        }
        out.flush()?;
        thread::sleep(POLL_INTERVAL);
    }

    out.flush()?;
    debug!(lines = written, "result writer finished");
    Ok(written)
}
