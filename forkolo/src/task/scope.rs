use crate::context::WorkerContext;
use crate::task::raw::{self, FrameHandle};
use crate::task::{Slot, SlotArray, Task};

/// The operations available to a task body during one `step`.
///
/// A step may issue at most one scheduling operation (`fork`, `call` or
/// `join`) and must then return [`Step::Pending`](crate::task::Step); the
/// scope records the operation for the worker's execution engine to carry
/// out once the body has actually suspended. Allocation does not suspend
/// and may be freely mixed in.
pub struct Scope<'a> {
    ctx: &'a WorkerContext,
    frame: FrameHandle,
    pending: Option<Pending>,
}

pub(crate) enum Pending {
    Fork(FrameHandle),
    Call(FrameHandle),
    Join,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(ctx: &'a WorkerContext, frame: FrameHandle) -> Self {
        Self {
            ctx,
            frame,
            pending: None,
        }
    }

    pub(crate) fn take_pending(&mut self) -> Option<Pending> {
        self.pending.take()
    }

    /// Index of the worker currently running this task. Mostly useful in
    /// tests and instrumentation; tasks migrate between workers at every
    /// suspension point.
    pub fn worker_index(&self) -> usize {
        self.ctx.index()
    }

    /// Forks `job` as a child of this task. The current step must return
    /// `Step::Pending` immediately afterwards; the remainder of the body is
    /// the continuation, which becomes stealable while the child runs on
    /// this worker.
    ///
    /// # Safety
    ///
    /// `slot` must stay alive and unmoved until the enclosing [`join`]
    /// returns: store it in this task's own state (or a [`SlotArray`] held
    /// there), never in a step-local temporary.
    ///
    /// [`join`]: Scope::join
    ///
    /// # Panics
    ///
    /// Panics if the step already issued a scheduling operation.
    pub unsafe fn fork<J: Task>(&mut self, slot: &Slot<J::Output>, job: J) {
        self.suspend_with(|ctx, parent| {
            let child = raw::new_frame(ctx, Some(parent), slot, false, job);
            parent.header().on_fork();
            Pending::Fork(child)
        });
    }

    /// Like [`fork`](Scope::fork), but the continuation is not made
    /// stealable: the child (and transitively its subtree) runs to
    /// completion before this task resumes, all without touching the deque.
    ///
    /// # Safety
    ///
    /// Same contract as [`fork`](Scope::fork).
    pub unsafe fn call<J: Task>(&mut self, slot: &Slot<J::Output>, job: J) {
        self.suspend_with(|ctx, parent| {
            let child = raw::new_frame(ctx, Some(parent), slot, true, job);
            parent.header().on_fork();
            Pending::Call(child)
        });
    }

    /// Suspends until every child forked or called since the previous join
    /// has completed. When the counter is already settled the worker
    /// re-enters `step` without suspending.
    ///
    /// # Panics
    ///
    /// Panics if the step already issued a scheduling operation.
    pub fn join(&mut self) {
        self.suspend_with(|_, _| Pending::Join);
    }

    /// Allocates `len` result slots on the current worker's fiber stack,
    /// for fan-outs whose width is only known at runtime.
    ///
    /// # Safety
    ///
    /// The array must be dropped before the pool shuts down; storing it in
    /// this task's own state satisfies that.
    pub unsafe fn alloc_slots<T: Send>(&mut self, len: usize) -> SlotArray<T> {
        let (payload, block) = self.ctx.stack.alloc(SlotArray::<T>::layout(len));
        SlotArray::init(payload, len, block)
    }

    fn suspend_with(&mut self, op: impl FnOnce(&WorkerContext, FrameHandle) -> Pending) {
        assert!(
            self.pending.is_none(),
            "a step may issue at most one fork, call or join"
        );
        self.pending = Some(op(self.ctx, self.frame));
    }
}
