use std::cell::Cell;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

/// A node of the wake list, embedded in the value it carries. The list never
/// allocates; whoever owns the node keeps it alive until it has been
/// drained.
pub(crate) struct WakeNode<T> {
    next: AtomicPtr<WakeNode<T>>,
    data: Cell<Option<T>>,
}

impl<T> WakeNode<T> {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            data: Cell::new(None),
        }
    }
}

/// Lock-free multi-producer single-consumer intrusive stack.
///
/// External submissions cannot go through the deque (its bottom face is
/// single-producer), so each worker owns one of these: any thread pushes,
/// only the owner drains. `try_pop_all` detaches the whole chain at once,
/// yielding the nodes in FILO order.
pub(crate) struct WakeList<T> {
    head: AtomicPtr<WakeNode<T>>,
}

// Safety: `data` is written by the pusher before the release CAS publishes
// the node and read only by the draining owner afterwards.
unsafe impl<T: Send> Send for WakeList<T> {}
unsafe impl<T: Send> Sync for WakeList<T> {}

impl<T> WakeList<T> {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Pushes a node. Callable from any thread, any number of times, but a
    /// given node must not be pushed again before the owner drained it.
    pub(crate) fn push(&self, node: NonNull<WakeNode<T>>, value: T) {
        unsafe {
            node.as_ref().data.set(Some(value));
        }

        let mut stale = self.head.load(Ordering::Relaxed);
        loop {
            unsafe {
                node.as_ref().next.store(stale, Ordering::Relaxed);
            }
            match self.head.compare_exchange_weak(
                stale,
                node.as_ptr(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(head) => stale = head,
            }
        }
    }

    /// Detaches every pushed node and hands their values to `consume` in
    /// FILO order. Owner thread only.
    ///
    /// The `next` link is read before `consume` runs: the consumer is
    /// allowed to free the node's backing memory.
    pub(crate) fn try_pop_all(&self, mut consume: impl FnMut(T)) {
        let mut cur = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        while let Some(node) = NonNull::new(cur) {
            let node = unsafe { node.as_ref() };
            cur = node.next.load(Ordering::Relaxed);
            let value = node.data.take().expect("wake node drained twice");
            consume(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn drains_in_filo_order() {
        let list = WakeList::new();
        let nodes: Vec<_> = (0..4).map(|_| Box::new(WakeNode::new())).collect();
        for (i, node) in nodes.iter().enumerate() {
            list.push(NonNull::from(&**node), i);
        }

        let mut seen = Vec::new();
        list.try_pop_all(|v| seen.push(v));
        assert_eq!(seen, vec![3, 2, 1, 0]);

        // Empty after a drain.
        list.try_pop_all(|_: usize| panic!("list should be empty"));
    }

    #[test]
    fn concurrent_pushes_all_arrive() {
        const PUSHERS: usize = 8;
        const PER_PUSHER: usize = 1000;

        struct Slot {
            node: WakeNode<usize>,
        }
        // Safety: each node is pushed once and read only by the drainer.
        unsafe impl Sync for Slot {}

        let slots: Arc<Vec<Slot>> = Arc::new(
            (0..PUSHERS * PER_PUSHER)
                .map(|_| Slot {
                    node: WakeNode::new(),
                })
                .collect(),
        );
        let list = Arc::new(WakeList::new());
        let barrier = Arc::new(Barrier::new(PUSHERS));

        let handles: Vec<_> = (0..PUSHERS)
            .map(|p| {
                let slots = Arc::clone(&slots);
                let list = Arc::clone(&list);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..PER_PUSHER {
                        let idx = p * PER_PUSHER + i;
                        list.push(NonNull::from(&slots[idx].node), idx);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut seen = vec![false; PUSHERS * PER_PUSHER];
        list.try_pop_all(|v| {
            assert!(!seen[v], "value {v} delivered twice");
            seen[v] = true;
        });
        assert!(seen.iter().all(|&s| s), "values lost");
    }
}
