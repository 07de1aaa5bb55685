//! Error types for lsdup.
//!
//! Every error here is local and recoverable: it is returned to the immediate caller and never
//! leaves shared state half-updated.

use std::fmt;
use std::io;

use thiserror::Error;

/// Errors returned by the map, the thread pool and the pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// A segment buffer could not be allocated.
    #[error("out of memory")]
    OutOfMemory,

    /// An argument is outside the accepted domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The key is already present.
    #[error("key already exists")]
    AlreadyExists,

    /// The key is not present.
    #[error("key not found")]
    NotFound,

    /// Destroy was refused because data or outstanding work remains.
    #[error("not empty")]
    NotEmpty,

    /// Task submitted to a pool that is shutting down.
    #[error("thread pool is stopped")]
    Stopped,

    /// A worker thread could not be created.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] io::Error),

    /// Writing results failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The run was interrupted by a signal.
    #[error("interrupted")]
    Interrupted,
}

/// An operation that failed and handed its input back.
///
/// Used where dropping the input on failure would lose data: a duplicate `insert` returns the
/// payload, a refused `destroy` returns the map or pool untouched.
pub struct Rejected<T> {
    /// Why the operation failed.
    pub kind: Error,
    /// The input, unchanged.
    pub value: T,
}

impl<T> Rejected<T> {
    pub(crate) fn new(kind: Error, value: T) -> Self {
        Self { kind, value }
    }

    /// Returns the input.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl<T> std::error::Error for Rejected<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl<T> From<Rejected<T>> for Error {
    fn from(rejected: Rejected<T>) -> Self {
        rejected.kind
    }
}
