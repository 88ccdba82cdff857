use std::sync::Arc;
use std::thread;

use anyhow::Result;

use crate::runtime::{Pool, STEAL_ATTEMPTS};

const DEFAULT_SEGMENT_SIZE: usize = 128 * 1024;

pub(crate) type ThreadNameFn = Arc<dyn Fn(usize) -> String + Send + Sync + 'static>;

/// Configures and builds a [`Pool`].
pub struct Builder {
    /// Number of worker contexts, including the one the submitting thread
    /// occupies during `sync_wait`. Defaults to the hardware concurrency.
    worker_threads: Option<usize>,

    /// Name fn for threads spawned by the pool, by context index.
    thread_name: ThreadNameFn,

    /// OS stack size for spawned threads. This is distinct from the fiber
    /// stack: task frames never live on the OS stack.
    thread_stack_size: Option<usize>,

    /// Initial fiber-stack segment size per worker, a power of two.
    segment_size: usize,

    /// Failed steals before a worker re-checks its stop condition.
    steal_attempts: usize,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            worker_threads: None,
            thread_name: Arc::new(|i| format!("forkolo-worker-{i}")),
            thread_stack_size: None,
            segment_size: DEFAULT_SEGMENT_SIZE,
            steal_attempts: STEAL_ATTEMPTS,
        }
    }

    /// Sets the number of worker contexts.
    ///
    /// # Panics
    ///
    /// Panics if `val` is 0.
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "worker threads cannot be set to 0");
        self.worker_threads = Some(val);
        self
    }

    /// Sets a function generating thread names from the context index.
    ///
    /// The default yields "forkolo-worker-{N}".
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) -> String + Send + Sync + 'static,
    {
        self.thread_name = Arc::new(f);
        self
    }

    /// Sets the OS stack size (in bytes) for worker threads.
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        self.thread_stack_size = Some(val);
        self
    }

    /// Sets the initial fiber-stack segment size per worker. Segments grow
    /// by doubling when a computation outgrows them.
    ///
    /// # Panics
    ///
    /// Panics if `val` is not a power of two.
    pub fn segment_size(mut self, val: usize) -> Self {
        assert!(val.is_power_of_two(), "segment size must be a power of two");
        self.segment_size = val;
        self
    }

    /// Sets how many failed steal attempts a worker makes before it
    /// re-checks its stop condition. The default is 1024.
    pub fn steal_attempts(mut self, val: usize) -> Self {
        assert!(val > 0, "steal attempts cannot be set to 0");
        self.steal_attempts = val;
        self
    }

    /// Creates the configured [`Pool`], spawning its worker threads.
    pub fn try_build(&self) -> Result<Pool> {
        let worker_threads = self.worker_threads.unwrap_or_else(|| {
            thread::available_parallelism().map_or(1, |n| n.get())
        });
        Pool::build(RuntimeConfig {
            worker_threads,
            thread_name: Arc::clone(&self.thread_name),
            thread_stack_size: self.thread_stack_size,
            segment_size: self.segment_size,
            steal_attempts: self.steal_attempts,
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) worker_threads: usize,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) segment_size: usize,
    pub(crate) steal_attempts: usize,
}
