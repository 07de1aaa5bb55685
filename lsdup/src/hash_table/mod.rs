//! Lock-free resizable hash table.

mod segment_table;
mod split_ordered_list;

pub use segment_table::SegmentTable;
pub use split_ordered_list::{Entries, SplitOrderedList};
