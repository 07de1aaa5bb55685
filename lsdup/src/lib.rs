//! lsdup - concurrent duplicate file finder
//!
//! Files are grouped by size in a lock-free split-ordered hash table, then hashed and compared by
//! tasks running on a thread pool fed through a lock-free queue.

pub mod config;
pub mod error;
pub mod hash_table;
pub mod map;
pub mod pipeline;
pub mod pool;
pub mod tasks;
pub mod writer;

pub use error::{Error, Rejected};
pub use hash_table::SplitOrderedList;
pub use map::NonblockingMap;
pub use pool::{Handle, ThreadPool, ThreadPoolBuilder};
