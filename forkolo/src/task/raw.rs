use std::alloc::Layout;
use std::ptr::{self, NonNull};

use crate::context::WorkerContext;
use crate::task::frame::Header;
use crate::task::scope::{Pending, Scope};
use crate::task::state::Lifecycle;
use crate::task::{Slot, Step, Task};

/// Thin pointer to a live frame. What the deques and wake lists carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FrameHandle {
    ptr: NonNull<Header>,
}

// Safety: frames are handed between workers by the deque/steal and join
// protocols, which guarantee a single executor at a time.
unsafe impl Send for FrameHandle {}

impl FrameHandle {
    pub(crate) fn header(&self) -> &Header {
        unsafe { self.ptr.as_ref() }
    }

    /// Runs one step of the frame's body on `ctx`.
    ///
    /// # Safety
    ///
    /// The caller must be the frame's unique executor, on `ctx`'s thread.
    pub(crate) unsafe fn resume(self, ctx: &WorkerContext) -> Resumed {
        (self.header().vtable().resume)(self.ptr, ctx)
    }
}

/// How a resumption ended, interpreted by the worker's execution engine.
pub(crate) enum Resumed {
    /// Suspended at a fork: push the continuation, run the child.
    Fork { child: FrameHandle },
    /// Suspended at a call: run the child; its completion resumes us.
    Call { child: FrameHandle },
    /// Suspended at a join: run the join-counter protocol.
    Join,
    /// The body returned; the result is already in the slot.
    Completed,
}

pub(crate) struct Vtable {
    pub(crate) resume: unsafe fn(NonNull<Header>, &WorkerContext) -> Resumed,
}

/// The typed frame record. The header must stay at offset 0 so thin
/// `FrameHandle` pointers and typed pointers coincide.
#[repr(C)]
struct Frame<J: Task> {
    header: Header,
    /// Result slot supplied by the parent (or the sync-wait bridge).
    out: *const Slot<J::Output>,
    job: J,
}

fn vtable<J: Task>() -> &'static Vtable {
    &Vtable {
        resume: resume_step::<J>,
    }
}

/// Allocates and initialises a frame for `job` on `ctx`'s fiber stack.
///
/// # Safety
///
/// Must run on `ctx`'s thread. `slot` must stay alive and unmoved until the
/// frame completes; `parent`, when present, must outlive the child.
pub(crate) unsafe fn new_frame<J: Task>(
    ctx: &WorkerContext,
    parent: Option<FrameHandle>,
    slot: &Slot<J::Output>,
    call_child: bool,
    job: J,
) -> FrameHandle {
    let (payload, block) = ctx.stack.alloc(Layout::new::<Frame<J>>());
    let frame = payload.cast::<Frame<J>>();
    frame.as_ptr().write(Frame {
        header: Header::new(vtable::<J>(), parent, block, ctx.index(), call_child),
        out: slot,
        job,
    });
    FrameHandle { ptr: frame.cast() }
}

unsafe fn resume_step<J: Task>(ptr: NonNull<Header>, ctx: &WorkerContext) -> Resumed {
    let frame = ptr.cast::<Frame<J>>().as_ptr();
    let handle = FrameHandle { ptr };
    let mut scope = Scope::new(ctx, handle);

    let step = {
        // Only the `job` field is mutably borrowed; the header stays
        // reachable through the handle for the scope's counter updates.
        let job = &mut *ptr::addr_of_mut!((*frame).job);
        job.step(&mut scope)
    };

    match step {
        Step::Done(value) => {
            let out = *ptr::addr_of!((*frame).out);
            (*out).put(value);
            ptr::drop_in_place(ptr::addr_of_mut!((*frame).job));
            handle.header().state().set(Lifecycle::Completed);
            Resumed::Completed
        }
        Step::Pending => match scope.take_pending() {
            Some(Pending::Fork(child)) => Resumed::Fork { child },
            Some(Pending::Call(child)) => Resumed::Call { child },
            Some(Pending::Join) => Resumed::Join,
            None => panic!("task returned Step::Pending without fork, call or join"),
        },
    }
}
