//! Test-and-set lock guarding the combined structure.
//!
//! There is no queueing: whoever wins the compare-and-swap gets the lock, so
//! a waiter can in principle lose every race. Flat combining keeps that
//! acceptable because losers normally have their work done by the winner.

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};

const BACKOFF_LIMIT: u32 = 6;

/// Exponential spinning, capped at `2^BACKOFF_LIMIT` pause instructions.
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Backoff { step: 0 }
    }

    #[inline]
    pub fn spin(&mut self) {
        for _ in 0..1u32 << self.step {
            hint::spin_loop();
        }
        if self.step < BACKOFF_LIMIT {
            self.step += 1;
        }
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }
}

/// Binary lock state: locked or unlocked, changed only by CAS.
#[derive(Debug, Default)]
pub struct StructureLock {
    locked: AtomicBool,
}

impl StructureLock {
    pub const fn new() -> Self {
        StructureLock {
            locked: AtomicBool::new(false),
        }
    }

    /// Single non-blocking acquisition attempt.
    #[inline]
    pub fn try_lock(&self) -> bool {
        // Cheap read first so contended waiters do not bounce the line
        if self.locked.load(Ordering::Relaxed) {
            return false;
        }
        self.locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    /// Spin until acquired.
    pub fn lock(&self) {
        let mut backoff = Backoff::new();
        while !self.try_lock() {
            backoff.spin();
        }
    }

    /// Release the lock. Must only be called by the holder.
    #[inline]
    pub fn unlock(&self) {
        debug_assert!(self.is_locked(), "unlocking a free structure lock");
        self.locked.store(false, Ordering::SeqCst);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}
