//! Per-worker context and the state shared across the pool.
//!
//! A [`WorkerContext`] is exclusively owned by one thread for the lifetime
//! of the pool. Two of its faces are shared: the deque's steal side and the
//! wake list's push side. Everything else (deque bottom, fiber stack, RNG)
//! is owner-only, which is what the `unsafe` methods encode.

use std::cell::{Cell, RefCell};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::queue::{Deque, WakeList};
use crate::stack::FiberStack;
use crate::task::FrameHandle;
use crate::utils::Xoshiro256;

pub struct WorkerContext {
    index: usize,
    pub(crate) deque: Deque<FrameHandle>,
    pub(crate) stack: FiberStack,
    rng: RefCell<Xoshiro256>,
    wake_list: WakeList<FrameHandle>,
}

// Safety: shared faces (`steal`, `schedule`, frame retire) are lock-free
// and atomic; every other method is owner-only per its safety contract.
unsafe impl Send for WorkerContext {}
unsafe impl Sync for WorkerContext {}

impl WorkerContext {
    pub(crate) fn new(index: usize, rng: Xoshiro256, segment_size: usize) -> Self {
        Self {
            index,
            deque: Deque::new(),
            stack: FiberStack::new(segment_size),
            rng: RefCell::new(rng),
            wake_list: WakeList::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Hands a task to this worker from any thread. The deque's bottom
    /// face is single-producer, so this is the only way a frame crosses
    /// onto a context from outside: the sync-wait bridge submits the root
    /// here, and the worker drains scheduled handles before every round of
    /// stealing.
    pub(crate) fn schedule(&self, handle: FrameHandle) {
        self.wake_list.push(handle.header().wake_node(), handle);
    }

    /// Drains every scheduled handle, FILO.
    ///
    /// # Safety
    ///
    /// Owner thread only.
    pub(crate) unsafe fn try_pop_all(&self, consume: impl FnMut(FrameHandle)) {
        self.wake_list.try_pop_all(consume);
    }

    /// Steals the oldest continuation from this worker's deque. Any thread.
    pub(crate) fn steal(&self) -> Option<FrameHandle> {
        self.deque.steal()
    }

    /// Safety: owner thread only.
    pub(crate) unsafe fn push(&self, handle: FrameHandle) {
        self.deque.push(handle);
    }

    /// Safety: owner thread only.
    pub(crate) unsafe fn pop(&self) -> Option<FrameHandle> {
        self.deque.pop()
    }

    /// Safety: owner thread only.
    pub(crate) unsafe fn rng_below(&self, bound: usize) -> usize {
        self.rng.borrow_mut().below(bound)
    }
}

/// State every participant can reach: the contexts, the wake/stop flags and
/// the parking primitives behind them.
pub(crate) struct Shared {
    contexts: Vec<Arc<WorkerContext>>,
    steal_attempts: usize,

    /// Set while a root task is being driven; workers steal only while it
    /// is up. Cleared (release) by whichever worker completes the root.
    root_in_flight: AtomicBool,

    /// Set once, by the pool destructor.
    stop: AtomicBool,

    /// Workers park here between root submissions. The mutex orders the
    /// flag stores against the waits so no wakeup is lost.
    wake_lock: Mutex<()>,
    wake_cond: Condvar,
}

impl Shared {
    pub(crate) fn new(contexts: Vec<Arc<WorkerContext>>, steal_attempts: usize) -> Self {
        Self {
            contexts,
            steal_attempts,
            root_in_flight: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            wake_lock: Mutex::new(()),
            wake_cond: Condvar::new(),
        }
    }

    pub(crate) fn contexts(&self) -> &[Arc<WorkerContext>] {
        &self.contexts
    }

    pub(crate) fn steal_attempts(&self) -> usize {
        self.steal_attempts
    }

    pub(crate) fn root_in_flight(&self) -> bool {
        self.root_in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Announces a root submission and wakes every parked worker.
    pub(crate) fn set_root_in_flight(&self) {
        self.root_in_flight.store(true, Ordering::Release);
        self.notify_all();
    }

    /// Called by the worker that completed the root. The submitting thread
    /// and the stealing workers poll the flag; no notification is needed.
    pub(crate) fn clear_root_in_flight(&self) {
        self.root_in_flight.store(false, Ordering::Release);
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.notify_all();
    }

    /// Parks until a root is submitted or stop is requested.
    pub(crate) fn wait_for_work(&self) {
        let mut guard = self.wake_lock.lock();
        while !self.root_in_flight() && !self.stop_requested() {
            self.wake_cond.wait(&mut guard);
        }
    }

    fn notify_all(&self) {
        // Taking the lock pins every waiter either before its flag check or
        // inside the wait, so the notify below cannot fall between the two.
        drop(self.wake_lock.lock());
        self.wake_cond.notify_all();
    }
}

thread_local! {
    static CURRENT: Cell<*const WorkerContext> = const { Cell::new(ptr::null()) };
}

/// Binds the calling thread to `ctx` until the guard drops. Worker threads
/// hold this for their whole life; the sync-wait bridge holds it while the
/// submitting thread doubles as context 0.
pub(crate) fn enter(ctx: &Arc<WorkerContext>) -> ContextGuard {
    CURRENT.with(|current| {
        debug_assert!(current.get().is_null(), "thread already bound to a context");
        current.set(Arc::as_ptr(ctx));
    });
    ContextGuard { _priv: () }
}

/// True when the calling thread is bound to `ctx`.
pub(crate) fn is_current(ctx: &WorkerContext) -> bool {
    CURRENT.with(|current| ptr::eq(current.get(), ctx))
}

pub(crate) struct ContextGuard {
    _priv: (),
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|current| current.set(ptr::null()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{raw, Scope, Slot, Step, Task};

    fn test_context() -> Arc<WorkerContext> {
        Arc::new(WorkerContext::new(0, Xoshiro256::from_seed(1), 4096))
    }

    struct Noop;

    impl Task for Noop {
        type Output = ();

        fn step(&mut self, _scope: &mut Scope<'_>) -> Step<()> {
            Step::Done(())
        }
    }

    #[test]
    fn scheduled_handles_drain_in_filo_order() {
        let ctx = test_context();
        let slot_a = Slot::new();
        let slot_b = Slot::new();
        // Safety: this thread owns the context and the slots outlive the
        // frames.
        let (a, b) = unsafe {
            (
                raw::new_frame(&ctx, None, &slot_a, false, Noop),
                raw::new_frame(&ctx, None, &slot_b, false, Noop),
            )
        };

        ctx.schedule(a);
        ctx.schedule(b);

        let mut drained = Vec::new();
        unsafe { ctx.try_pop_all(|handle| drained.push(handle)) };
        assert_eq!(drained, vec![b, a]);

        // A drain leaves the list empty.
        unsafe { ctx.try_pop_all(|_| panic!("wake list should be empty")) };
    }

    #[test]
    fn context_binding_is_scoped_to_the_guard() {
        let ctx = test_context();
        assert!(!is_current(&ctx));
        {
            let _guard = enter(&ctx);
            assert!(is_current(&ctx));
        }
        assert!(!is_current(&ctx));
    }

    #[test]
    fn wait_for_work_returns_on_stop() {
        use std::thread;
        use std::time::Duration;

        let shared = Arc::new(Shared::new(vec![test_context()], 16));
        let waiter = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || shared.wait_for_work())
        };
        thread::sleep(Duration::from_millis(20));
        shared.request_stop();
        waiter.join().unwrap();
        assert!(shared.stop_requested());
    }
}
