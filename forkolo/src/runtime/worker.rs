use std::ptr;
use std::sync::Arc;
use std::thread;

use tracing::trace;

use crate::context::{self, Shared, WorkerContext};
use crate::stack;
use crate::task::state::Lifecycle;
use crate::task::{FrameHandle, Resumed};

/// Failed steals before a worker re-checks its stop condition.
pub(crate) const STEAL_ATTEMPTS: usize = 1024;

/// One participant in the steal protocol: a pool thread, or the submitting
/// thread while it is blocked in `sync_wait`.
pub(crate) struct Worker {
    ctx: Arc<WorkerContext>,
    shared: Arc<Shared>,
}

impl Worker {
    pub(crate) fn new(ctx: Arc<WorkerContext>, shared: Arc<Shared>) -> Self {
        Self { ctx, shared }
    }

    /// Main loop of a pool thread: park between root submissions, steal
    /// while one is in flight, exit on stop.
    pub(crate) fn run(&self) {
        loop {
            self.shared.wait_for_work();
            if self.shared.stop_requested() {
                trace!(worker = self.ctx.index(), "worker stops");
                return;
            }
            trace!(worker = self.ctx.index(), "worker wakes");
            self.steal_until(|| !self.shared.root_in_flight());
        }
    }

    /// Steals and executes work until `done` holds (or stop is requested).
    ///
    /// Victims are drawn uniformly at random from the other contexts; after
    /// `steal_attempts` consecutive failures the stop condition is
    /// re-checked. There is no sleeping here: quiescence between roots is
    /// handled by the outer flag wait.
    pub(crate) fn steal_until(&self, done: impl Fn() -> bool) {
        let contexts = self.shared.contexts();
        let n = contexts.len();

        while !done() && !self.shared.stop_requested() {
            // Externally scheduled work first; the deque cannot accept
            // submissions from other threads.
            unsafe { self.ctx.try_pop_all(|handle| self.execute(handle)) };

            if n > 1 {
                let mut attempt = 0;
                while attempt < self.shared.steal_attempts() {
                    // A draw may hit ourselves; skipped without counting,
                    // so an attempt is always a real victim probed.
                    let victim = unsafe { self.ctx.rng_below(n) };
                    if victim == self.ctx.index() {
                        continue;
                    }
                    match contexts[victim].steal() {
                        Some(work) => {
                            attempt = 0;
                            self.resume_stolen(work);
                        }
                        None => attempt += 1,
                    }
                }
            }
            thread::yield_now();
        }
    }

    /// Resumes a stolen continuation on this worker. Frames the stolen task
    /// allocates from here on live on our stack; the victim's stack is
    /// never written.
    fn resume_stolen(&self, handle: FrameHandle) {
        trace!(worker = self.ctx.index(), "resuming stolen work");
        self.execute(handle);
        debug_assert!(
            self.ctx.deque.is_empty(),
            "deque not drained after stolen work completed"
        );
    }

    /// The execution engine: runs `handle` and then whatever the protocols
    /// hand back (forked children, called children, popped continuations,
    /// parents resumed by a final completion) until the chain goes dry.
    pub(crate) fn execute(&self, handle: FrameHandle) {
        debug_assert!(context::is_current(&self.ctx));

        let mut current = Some(handle);
        while let Some(frame) = current.take() {
            let header = frame.header();
            debug_assert_ne!(header.state().get(), Lifecycle::Completed);
            header.bind_ctx(&self.ctx);
            header.state().set(Lifecycle::Executing);

            // Safety: the deque/join protocols make us the unique executor.
            current = match unsafe { frame.resume(&self.ctx) } {
                Resumed::Fork { child } => {
                    // The continuation becomes stealable; the child stays
                    // local.
                    header.state().set(Lifecycle::Stealable);
                    unsafe { self.ctx.push(frame) };
                    Some(child)
                }
                Resumed::Call { child } => Some(child),
                Resumed::Join => self.finish_join(frame),
                Resumed::Completed => self.finish_complete(frame),
            };
        }
    }

    /// The join protocol. Returns the frame when every child has already
    /// completed (continue inline); otherwise the frame stays suspended and
    /// the last child's completion will resume it elsewhere.
    fn finish_join(&self, frame: FrameHandle) -> Option<FrameHandle> {
        if frame.header().begin_join() {
            frame.header().reset_join();
            Some(frame)
        } else {
            None
        }
    }

    /// The completion protocol. Frees the frame, then decides who runs
    /// next: the parent directly (call child, or last-child join wakeup),
    /// the continuation popped from our deque, or nobody.
    fn finish_complete(&self, frame: FrameHandle) -> Option<FrameHandle> {
        let header = frame.header();
        let parent = header.parent();
        let call_child = header.is_call_child();
        self.free_frame(frame);

        let parent = match parent {
            Some(parent) => parent,
            None => {
                trace!("root task completes");
                self.shared.clear_root_in_flight();
                return None;
            }
        };

        if call_child {
            // The continuation was never pushed; we resume the parent
            // directly. Its join counter cannot hit zero here because the
            // parent still holds its self contribution.
            let zero = parent.header().on_child_complete();
            debug_assert!(!zero, "call child saw the zero transition");
            return Some(parent);
        }

        if parent.header().on_child_complete() {
            // Last child of a suspended join: we resume the parent on our
            // own context, wherever it ran before.
            parent.header().reset_join();
            return Some(parent);
        }

        // The parent's continuation is the newest entry of our deque unless
        // a thief got there first.
        let popped = unsafe { self.ctx.pop() };
        if let Some(continuation) = popped {
            debug_assert_eq!(continuation, parent, "deque returned a foreign continuation");
        }
        popped
    }

    /// Reclaims a completed frame's block: the owner path rewinds the bump
    /// pointer, the remote path flags the block for the owner's sweep.
    fn free_frame(&self, frame: FrameHandle) {
        let header = frame.header();
        debug_assert_eq!(header.state().get(), Lifecycle::Completed);
        // Completion always happens on whichever context last resumed the
        // frame; that is the frame's recorded context, not its home.
        debug_assert!(ptr::eq(header.ctx(), &*self.ctx));
        let block = header.block();
        if header.home() == self.ctx.index() {
            // Safety: we own this stack and the frame is dead.
            unsafe { self.ctx.stack.release(block) };
        } else {
            // Safety: the frame is dead; its home worker sweeps later.
            unsafe { stack::retire(block) };
        }
    }
}
