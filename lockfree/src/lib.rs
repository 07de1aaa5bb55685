//! Lock-free building blocks: a sorted list, FIFO queues and an append-only bag.
//!
//! Node lifetimes are managed by `crossbeam-epoch`; operations that may retire nodes take a
//! [`Guard`](crossbeam_epoch::Guard).

mod bag;
pub mod list;
pub mod mpsc;
mod queue;

pub use bag::Bag;
pub use list::{Cursor, List, Node};
pub use queue::Queue;
