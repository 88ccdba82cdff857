use std::cell::Cell;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::context::WorkerContext;
use crate::queue::WakeNode;
use crate::stack::BlockHeader;
use crate::task::raw::{FrameHandle, Vtable};
use crate::task::state::{Lifecycle, State};

/// The hot head of every frame, at offset 0 of the typed `Frame<J>` record.
///
/// Thin `FrameHandle` pointers point here; the vtable recovers the typed
/// frame. Cross-thread fields (`state`, `join`, the wake link) are atomic;
/// everything behind a `Cell` is only touched by the worker currently
/// executing the frame, which the scheduler guarantees is unique.
#[repr(C)]
pub(crate) struct Header {
    /// Lifecycle marker, see [`Lifecycle`].
    state: State,

    /// Join counter: 1 for the frame itself plus one per live child.
    join: AtomicU32,

    vtable: &'static Vtable,

    /// Parent frame, `None` for roots.
    parent: Option<FrameHandle>,

    /// The context that most recently resumed the frame. Updated on every
    /// resumption: the last child to complete resumes the parent on *its*
    /// worker, which need not be where the parent ran before.
    ctx: Cell<*const WorkerContext>,

    /// Allocator block backing this frame.
    block: NonNull<BlockHeader>,

    /// Index of the context whose stack the frame lives on. Whoever
    /// completes the frame uses this to pick the owner release path or the
    /// remote retire path.
    home: usize,

    /// A call child's completion resumes its parent directly; a fork
    /// child's completion goes through the deque pop / join counter.
    call_child: bool,

    /// Link for the owner context's external-submission wake list.
    wake: WakeNode<FrameHandle>,
}

// Safety: see the field comments; `Cell` fields are confined to the single
// executing worker.
unsafe impl Send for Header {}
unsafe impl Sync for Header {}

impl Header {
    pub(crate) fn new(
        vtable: &'static Vtable,
        parent: Option<FrameHandle>,
        block: NonNull<BlockHeader>,
        home: usize,
        call_child: bool,
    ) -> Self {
        Self {
            state: State::new(),
            join: AtomicU32::new(1),
            vtable,
            parent,
            ctx: Cell::new(ptr::null()),
            block,
            home,
            call_child,
            wake: WakeNode::new(),
        }
    }

    pub(crate) fn state(&self) -> &State {
        &self.state
    }

    pub(crate) fn vtable(&self) -> &'static Vtable {
        self.vtable
    }

    pub(crate) fn parent(&self) -> Option<FrameHandle> {
        self.parent
    }

    pub(crate) fn block(&self) -> NonNull<BlockHeader> {
        self.block
    }

    pub(crate) fn home(&self) -> usize {
        self.home
    }

    pub(crate) fn is_call_child(&self) -> bool {
        self.call_child
    }

    pub(crate) fn wake_node(&self) -> NonNull<WakeNode<FrameHandle>> {
        NonNull::from(&self.wake)
    }

    /// Records the context about to execute the frame.
    pub(crate) fn bind_ctx(&self, ctx: &WorkerContext) {
        self.ctx.set(ctx);
    }

    /// The context the frame last ran on. Debug-assert material only.
    pub(crate) fn ctx(&self) -> *const WorkerContext {
        self.ctx.get()
    }

    /// A child was forked: one more obligation before the next join.
    ///
    /// Relaxed is enough: the owner is the only writer here, and the deque
    /// push that makes the continuation stealable publishes the new count.
    pub(crate) fn on_fork(&self) {
        debug_assert_eq!(self.state.get(), Lifecycle::Executing);
        self.join.fetch_add(1, Ordering::Relaxed);
    }

    /// A child completed. Returns true when this was the decrement that hit
    /// zero, making the caller responsible for resuming this frame.
    ///
    /// Acq-rel: release publishes the child's writes (its result above all),
    /// acquire lets the zero observer see every sibling's writes.
    pub(crate) fn on_child_complete(&self) -> bool {
        let prev = self.join.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1, "join counter underflow");
        prev == 1
    }

    /// Enters the join: marks the frame awaiting and gives up the self
    /// contribution. Returns true when every child already completed, in
    /// which case the caller continues the frame inline.
    pub(crate) fn begin_join(&self) -> bool {
        self.state.set(Lifecycle::AwaitingJoin);
        let prev = self.join.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1, "join counter underflow");
        prev == 1
    }

    /// Re-arms the counter after a join completed, so the body can run
    /// another fork/join phase. The frame is exclusively owned again at this
    /// point; the next deque push publishes the store.
    pub(crate) fn reset_join(&self) {
        self.join.store(1, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn join_count(&self) -> u32 {
        self.join.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::raw::tests::noop_vtable;

    fn header() -> Header {
        Header::new(noop_vtable(), None, NonNull::dangling(), 0, false)
    }

    /// The counter algebra: fib-shaped fork + call + join, all
    /// children completing before the join.
    #[test]
    fn join_counter_balances_forks_and_completions() {
        let h = header();
        h.state().set(Lifecycle::Executing);

        h.on_fork(); // fork a
        h.on_fork(); // call b
        assert_eq!(h.join_count(), 3);

        assert!(!h.on_child_complete()); // a
        assert!(!h.on_child_complete()); // b
        assert_eq!(h.join_count(), 1);

        // All children done: the join continues inline.
        assert!(h.begin_join());
        h.reset_join();
        assert_eq!(h.join_count(), 1);
    }

    /// Children still outstanding at the join: the last completion is the
    /// zero transition, and exactly one party observes it.
    #[test]
    fn last_child_observes_the_zero_transition() {
        let h = header();
        h.state().set(Lifecycle::Executing);

        h.on_fork();
        h.on_fork();

        assert!(!h.begin_join()); // counter 3 -> 2, suspend
        assert_eq!(h.state().get(), Lifecycle::AwaitingJoin);

        assert!(!h.on_child_complete()); // 2 -> 1
        assert!(h.on_child_complete()); // 1 -> 0: resumer
    }
}
