use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::Result;
use crate::flat_combining::try_boxed_slice;
use crate::order::DeadlineOrder;

const NO_CACHED_CPU: usize = usize::MAX;

/// Single-slot hint for the processor with the best deadline.
///
/// Writers race on the slot with compare-and-swap, so the value may lag
/// behind the skip list for a moment; the combiner repairs it after every
/// pass, which makes it converge once updates stop.
#[derive(Debug)]
pub struct CachedBest {
    cpu: AtomicUsize,
    // Latest deadline reported by each processor, 0 when invalid
    deadlines: Box<[AtomicU64]>,
}

impl CachedBest {
    pub fn new(processors: usize) -> Result<Self> {
        Ok(CachedBest {
            cpu: AtomicUsize::new(NO_CACHED_CPU),
            deadlines: try_boxed_slice(processors, |_| AtomicU64::new(0))?,
        })
    }

    /// Currently cached processor.
    #[inline]
    pub fn get(&self) -> Option<usize> {
        match self.cpu.load(Ordering::Acquire) {
            NO_CACHED_CPU => None,
            cpu => Some(cpu),
        }
    }

    /// Deadline snapshot of `cpu`.
    #[inline]
    pub fn deadline_of(&self, cpu: usize) -> u64 {
        self.deadlines[cpu].load(Ordering::Acquire)
    }

    /// Record a valid deadline for `cpu` and take over the slot if it beats
    /// the cached processor.
    pub fn publish<O: DeadlineOrder + ?Sized>(&self, cpu: usize, deadline: u64, order: &O) {
        self.deadlines[cpu].store(deadline, Ordering::Release);

        loop {
            let cached = self.cpu.load(Ordering::Acquire);
            if cached == cpu {
                return;
            }
            if cached != NO_CACHED_CPU && !order.is_better(deadline, self.deadline_of(cached)) {
                return;
            }
            if self
                .cpu
                .compare_exchange(cached, cpu, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Forget `cpu`'s deadline and empty the slot if it was cached there.
    pub fn invalidate(&self, cpu: usize) {
        self.deadlines[cpu].store(0, Ordering::Release);
        let _ = self.cpu.compare_exchange(
            cpu,
            NO_CACHED_CPU,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Overwrite the slot with the structure's current best.
    ///
    /// Only the combiner calls this, while holding the structure lock.
    pub fn repair(&self, best: Option<usize>) {
        self.cpu
            .store(best.unwrap_or(NO_CACHED_CPU), Ordering::Release);
    }
}
