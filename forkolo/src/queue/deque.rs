use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicI64, AtomicPtr, Ordering};

use crossbeam_utils::CachePadded;

use crate::queue::ring::RingBuf;

const INITIAL_CAPACITY: i64 = 1024;

/// Lock-free Chase-Lev work-stealing deque.
///
/// The owner pushes and pops at the bottom; any thread may steal from the
/// top. `top` and `bottom` are signed, monotonically increasing and never
/// reset, so `bottom - top` is the length regardless of wraparound inside
/// the ring.
///
/// On overflow the owner swaps in a ring of double capacity and retires the
/// old one into a garbage list. Retired rings stay allocated until the deque
/// is dropped at pool shutdown: an in-flight thief may still be reading a
/// slot of a retired ring, and keeping the memory alive is what makes that
/// read harmless.
pub(crate) struct Deque<T> {
    top: CachePadded<AtomicI64>,
    bottom: CachePadded<AtomicI64>,
    buf: AtomicPtr<RingBuf<T>>,
    garbage: UnsafeCell<Vec<NonNull<RingBuf<T>>>>,
}

// Safety: `garbage` and the owner faces (`push`/`pop`) are only touched by
// the owning worker; `steal` and the index loads are the shared face and go
// through atomics.
unsafe impl<T: Send> Send for Deque<T> {}
unsafe impl<T: Send> Sync for Deque<T> {}

impl<T: Copy> Deque<T> {
    pub(crate) fn new() -> Self {
        let buf = Box::into_raw(Box::new(RingBuf::new(INITIAL_CAPACITY)));
        Self {
            top: CachePadded::new(AtomicI64::new(0)),
            bottom: CachePadded::new(AtomicI64::new(0)),
            buf: AtomicPtr::new(buf),
            garbage: UnsafeCell::new(Vec::new()),
        }
    }

    /// Snapshot emptiness. Exact for the owner; a racy hint for others.
    pub(crate) fn is_empty(&self) -> bool {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        b <= t
    }

    /// Pushes `value` at the bottom.
    ///
    /// # Safety
    ///
    /// Owner thread only.
    pub(crate) unsafe fn push(&self, value: T) {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        let mut buf = &*self.buf.load(Ordering::Relaxed);

        if b - t >= buf.capacity() {
            buf = self.grow(b, t, buf);
        }

        buf.store(b, value);
        // Publish the slot before making it reachable through `bottom`.
        fence(Ordering::Release);
        self.bottom.store(b + 1, Ordering::Relaxed);
    }

    /// Pops from the bottom.
    ///
    /// # Safety
    ///
    /// Owner thread only.
    pub(crate) unsafe fn pop(&self) -> Option<T> {
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        let buf = &*self.buf.load(Ordering::Relaxed);
        self.bottom.store(b, Ordering::Relaxed);
        // Order the `bottom` store against the `top` load: either a
        // concurrent thief sees the reduced bottom, or we see its CAS.
        fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Relaxed);

        if t > b {
            // Already empty; restore.
            self.bottom.store(b + 1, Ordering::Relaxed);
            return None;
        }

        if t == b {
            // Single element: race the thieves for it.
            let won = self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.bottom.store(b + 1, Ordering::Relaxed);
            return won.then(|| buf.load(b));
        }

        Some(buf.load(b))
    }

    /// Steals from the top. Any thread. A lost race returns `None` even if
    /// the deque is non-empty; callers treat it as a failed attempt.
    pub(crate) fn steal(&self) -> Option<T> {
        let t = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);

        if t >= b {
            return None;
        }

        // The slot must be read *before* the CAS: a winning owner `push`
        // may overwrite it right after `top` moves. If we lose the CAS the
        // possibly-torn value is discarded, which `T: Copy` makes benign.
        let value = unsafe { (*self.buf.load(Ordering::Acquire)).load(t) };

        self.top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
            .then_some(value)
    }

    /// Swaps in a ring of double capacity and retires the old one.
    ///
    /// Safety: owner only, called from `push`.
    unsafe fn grow(&self, b: i64, t: i64, old: &RingBuf<T>) -> &RingBuf<T> {
        let bigger = Box::into_raw(Box::new(old.grow(b, t)));
        let retired = self.buf.swap(bigger, Ordering::Release);
        (*self.garbage.get()).push(NonNull::new_unchecked(retired));
        &*bigger
    }
}

impl<T> Drop for Deque<T> {
    fn drop(&mut self) {
        // All workers have been joined by the time the pool drops its
        // contexts, so no thief can be reading the retired rings anymore.
        unsafe {
            drop(Box::from_raw(self.buf.load(Ordering::Relaxed)));
            for ring in (*self.garbage.get()).drain(..) {
                drop(Box::from_raw(ring.as_ptr()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn owner_push_pop_is_lifo() {
        let deque = Deque::new();
        unsafe {
            for i in 0..10u64 {
                deque.push(i);
            }
            for i in (0..10u64).rev() {
                assert_eq!(deque.pop(), Some(i));
            }
            assert_eq!(deque.pop(), None);
        }
    }

    #[test]
    fn steal_is_fifo() {
        let deque = Deque::new();
        unsafe {
            for i in 0..10u64 {
                deque.push(i);
            }
        }
        for i in 0..10u64 {
            assert_eq!(deque.steal(), Some(i));
        }
        assert_eq!(deque.steal(), None);
    }

    #[test]
    fn push_beyond_capacity_resizes() {
        let deque = Deque::new();
        let n = INITIAL_CAPACITY * 4;
        unsafe {
            for i in 0..n {
                deque.push(i);
            }
            for i in (0..n).rev() {
                assert_eq!(deque.pop(), Some(i));
            }
        }
        // Two retired rings must still be alive on the garbage list.
        assert_eq!(unsafe { (*deque.garbage.get()).len() }, 2);
    }

    /// For one owner and M thieves, every pushed value must be returned by
    /// exactly one `pop` or `steal`.
    #[test]
    fn no_element_lost_or_duplicated_under_contention() {
        const THIEVES: usize = 4;
        const PER_ROUND: u64 = 64;
        const ROUNDS: u64 = 200;

        let deque = Arc::new(Deque::new());
        let done = Arc::new(AtomicBool::new(false));

        let thieves: Vec<_> = (0..THIEVES)
            .map(|_| {
                let deque = Arc::clone(&deque);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut got = Vec::new();
                    while !done.load(Ordering::Acquire) {
                        if let Some(v) = deque.steal() {
                            got.push(v);
                        }
                    }
                    // Drain stragglers left after the owner stopped.
                    while let Some(v) = deque.steal() {
                        got.push(v);
                    }
                    got
                })
            })
            .collect();

        let mut popped = Vec::new();
        for round in 0..ROUNDS {
            unsafe {
                for i in 0..PER_ROUND {
                    deque.push(round * PER_ROUND + i);
                }
                for _ in 0..PER_ROUND / 2 {
                    if let Some(v) = deque.pop() {
                        popped.push(v);
                    }
                }
            }
        }
        done.store(true, Ordering::Release);

        let mut seen = HashSet::new();
        for v in popped {
            assert!(seen.insert(v), "value {v} delivered twice");
        }
        for thief in thieves {
            for v in thief.join().unwrap() {
                assert!(seen.insert(v), "value {v} delivered twice");
            }
        }
        // Anything not popped or stolen must still be in the deque.
        while let Some(v) = unsafe { deque.pop() } {
            assert!(seen.insert(v), "value {v} delivered twice");
        }
        assert_eq!(seen.len() as u64, ROUNDS * PER_ROUND, "values lost");
    }
}
