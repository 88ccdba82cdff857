use crate::runtime::Pool;
use crate::task::{Scope, Slot, Step, Task};

/// Applies `f` to every element of `data` in parallel.
///
/// Divide and conquer: the slice is split in half until a piece has at most
/// `grain` elements, which is then processed serially. One half is forked,
/// the other is called, so an idle worker can pick up the forked half while
/// this worker descends into the called one.
pub fn for_each<T, F>(pool: &Pool, data: &mut [T], grain: usize, f: F)
where
    T: Send,
    F: Fn(&mut T) + Clone + Send,
{
    pool.sync_wait(ForEach::new(data, grain, f));
}

/// The task behind [`for_each`], usable directly as a child of a larger
/// computation.
pub struct ForEach<'a, T, F> {
    slice: Option<&'a mut [T]>,
    /// Right half, parked between the fork and the call.
    upper: Option<&'a mut [T]>,
    grain: usize,
    f: F,
    phase: u8,
    lo: Slot<()>,
    hi: Slot<()>,
}

impl<'a, T, F> ForEach<'a, T, F> {
    /// # Panics
    ///
    /// Panics if `grain` is 0.
    pub fn new(data: &'a mut [T], grain: usize, f: F) -> Self {
        assert!(grain > 0, "grain cannot be 0");
        Self {
            slice: Some(data),
            upper: None,
            grain,
            f,
            phase: 0,
            lo: Slot::new(),
            hi: Slot::new(),
        }
    }
}

impl<T, F> Task for ForEach<'_, T, F>
where
    T: Send,
    F: Fn(&mut T) + Clone + Send,
{
    type Output = ();

    fn step(&mut self, scope: &mut Scope<'_>) -> Step<()> {
        match self.phase {
            0 => {
                let slice = self.slice.take().expect("slice already consumed");
                if slice.len() <= self.grain {
                    for item in slice {
                        (self.f)(item);
                    }
                    return Step::Done(());
                }
                let mid = slice.len() / 2;
                let (lower, upper) = slice.split_at_mut(mid);
                self.upper = Some(upper);
                self.phase = 1;
                // Safety: the slots live in this task until the join.
                unsafe {
                    scope.fork(&self.lo, ForEach::new(lower, self.grain, self.f.clone()))
                };
                Step::Pending
            }
            1 => {
                let upper = self.upper.take().expect("upper half already consumed");
                self.phase = 2;
                unsafe {
                    scope.call(&self.hi, ForEach::new(upper, self.grain, self.f.clone()))
                };
                Step::Pending
            }
            2 => {
                self.phase = 3;
                scope.join();
                Step::Pending
            }
            _ => Step::Done(()),
        }
    }
}
