use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle marker of a frame.
///
/// The marker is bookkeeping, not synchronisation: ownership hand-offs are
/// ordered by the deque and the join counter, and the marker exists so that
/// protocol violations trip debug assertions instead of corrupting memory
/// silently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Lifecycle {
    /// Allocated, never resumed.
    Created = 0,
    /// Suspended at a fork with its continuation in a deque.
    Stealable = 1,
    /// Owned by exactly one worker, inside `step`.
    Executing = 2,
    /// Suspended at a join with children outstanding.
    AwaitingJoin = 3,
    /// Body returned; the frame is dead once its result is consumed.
    Completed = 4,
}

pub(crate) struct State(AtomicU8);

impl State {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(Lifecycle::Created as u8))
    }

    pub(crate) fn get(&self) -> Lifecycle {
        match self.0.load(Ordering::Relaxed) {
            0 => Lifecycle::Created,
            1 => Lifecycle::Stealable,
            2 => Lifecycle::Executing,
            3 => Lifecycle::AwaitingJoin,
            4 => Lifecycle::Completed,
            _ => unreachable!("corrupt frame state"),
        }
    }

    pub(crate) fn set(&self, lifecycle: Lifecycle) {
        self.0.store(lifecycle as u8, Ordering::Relaxed);
    }
}
