//! Lock-free queues backing the scheduler.
//!
//! One Chase-Lev deque and one intrusive wake list per worker. The deque
//! carries continuations between workers; the wake list is the only channel
//! by which a non-owner thread can hand work to a worker, because the deque
//! has a single-producer bottom.

pub(crate) mod deque;
pub(crate) mod ring;
pub(crate) mod wake_list;

pub(crate) use deque::Deque;
pub(crate) use wake_list::{WakeList, WakeNode};
