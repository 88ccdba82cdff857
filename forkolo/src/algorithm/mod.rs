//! Parallel algorithms built on the fork/join primitives.

mod for_each;

pub use for_each::{for_each, ForEach};
