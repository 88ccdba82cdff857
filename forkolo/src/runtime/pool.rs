use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context as _, Result};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::context::{self, Shared, WorkerContext};
use crate::runtime::{RuntimeConfig, Worker};
use crate::task::{raw, Slot, Task};
use crate::utils::Xoshiro256;

/// A fixed pool of worker threads driving fork/join computations.
///
/// The pool owns `N - 1` threads for `N` worker contexts; context 0 belongs
/// to whichever thread is blocked in [`sync_wait`](Pool::sync_wait).
/// Workers park between submissions and steal while a root is in flight.
///
/// Dropping the pool stops and joins every thread. Dropping it while a root
/// task is still pending is a programming error.
pub struct Pool {
    pub(crate) shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    /// Serialises sync_wait callers: context 0 fits one submitter at a time.
    submit_lock: Mutex<()>,
}

impl Pool {
    /// Builds a pool with `workers` contexts.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is 0 or a worker thread cannot be spawned; use
    /// [`Builder::try_build`](crate::Builder::try_build) to handle spawn
    /// failures.
    pub fn new(workers: usize) -> Pool {
        crate::Builder::new()
            .worker_threads(workers)
            .try_build()
            .expect("failed to build pool")
    }

    pub(crate) fn build(cfg: RuntimeConfig) -> Result<Pool> {
        // One seed, one long jump per context: disjoint victim-selection
        // streams without coordination.
        let mut rng = Xoshiro256::from_seed(fastrand::u64(..));
        let contexts: Vec<_> = (0..cfg.worker_threads)
            .map(|index| {
                let stream = rng.clone();
                rng.long_jump();
                Arc::new(WorkerContext::new(index, stream, cfg.segment_size))
            })
            .collect();

        let shared = Arc::new(Shared::new(contexts, cfg.steal_attempts));

        // Contexts 1..N get a thread each; context 0 is reserved for the
        // submitting thread.
        let handles = (1..cfg.worker_threads)
            .map(|index| {
                let worker = Worker::new(shared.contexts()[index].clone(), Arc::clone(&shared));
                let ctx = shared.contexts()[index].clone();

                let mut builder = thread::Builder::new().name((cfg.thread_name)(index));
                if let Some(stack_size) = cfg.thread_stack_size {
                    builder = builder.stack_size(stack_size);
                }
                builder
                    .spawn(move || {
                        let _bound = context::enter(&ctx);
                        worker.run();
                    })
                    .with_context(|| format!("failed to spawn worker thread {index}"))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(workers = cfg.worker_threads, "pool started");
        Ok(Pool {
            shared,
            handles: Mutex::new(handles),
            submit_lock: Mutex::new(()),
        })
    }

    /// Number of worker contexts, the submitting thread's included.
    pub fn workers(&self) -> usize {
        self.shared.contexts().len()
    }

    /// Runs `job` to completion on the pool and returns its result.
    ///
    /// The calling thread binds to context 0 and participates in stealing
    /// until the root completes, so a single-context pool executes the
    /// whole computation on the caller. Concurrent callers are serialised.
    pub fn sync_wait<J: Task>(&self, job: J) -> J::Output {
        let _submission = self.submit_lock.lock();

        let ctx0 = self.shared.contexts()[0].clone();
        let _bound = context::enter(&ctx0);

        let mut slot = Slot::new();
        // Safety: we are bound to context 0 for the whole call and `slot`
        // outlives the root frame below.
        let root = unsafe { raw::new_frame(&ctx0, None, &slot, false, job) };

        // The deque's bottom face belongs to the worker loop, so the root
        // crosses onto context 0 through its wake list; we drain it
        // ourselves at the top of the steal loop, before the first steal
        // attempt, which keeps the root starting on context 0.
        ctx0.schedule(root);

        trace!("root task starts");
        self.shared.set_root_in_flight();

        let worker = Worker::new(ctx0, Arc::clone(&self.shared));
        // Drives the root, then keeps stealing until its completion clears
        // the flag; parts of the root's tree may migrate to other workers.
        worker.steal_until(|| !self.shared.root_in_flight());

        slot.take()
    }

    /// Stops and joins every worker thread, reporting threads that
    /// panicked. Called implicitly (with the error logged) on drop.
    pub fn shutdown(self) -> Result<()> {
        self.shutdown_inner()
    }

    fn shutdown_inner(&self) -> Result<()> {
        debug_assert!(
            !self.shared.root_in_flight(),
            "pool shut down while a root task is pending"
        );
        self.shared.request_stop();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        let panicked = handles
            .into_iter()
            .filter_map(|handle| {
                trace!(thread = ?handle.thread().name(), "joining worker");
                handle.join().err()
            })
            .count();

        if panicked == 0 {
            Ok(())
        } else {
            Err(anyhow!("{panicked} worker thread(s) panicked"))
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Err(error) = self.shutdown_inner() {
            warn!(%error, "pool shutdown reported worker failures");
        }
    }
}
