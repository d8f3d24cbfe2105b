//! Bitmap flat combining.
//!
//! Each processor owns a small ring of publication records. Publishing a
//! record sets the slot's bit in the processor's pending bitmap and then the
//! processor's bit in the global presence bitmap. Whoever wins the structure
//! lock becomes the combiner and applies every pending record:
//!
//! ```text
//!  presence  [ 0 1 0 0 1 ... ]        scanned highest bit first
//!                │       │
//!                ▼       ▼
//!  pending   cpu1 ring  cpu4 ring     drained oldest slot first
//!            [r0 r1 ..] [r0 r1 ..]
//! ```
//!
//! A slot's pending bit is cleared only after its record has been applied,
//! which is also what hands the slot back to its owner. Between reservation
//! and publication a slot is marked in the owner's reserved bitmap instead,
//! so two reservations never share a slot.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering, fence};

use tracing::{error, trace};

use crate::bitmap::{AtomicBitmap, BITMAP_WIDTH, CpuMask};
use crate::error::{Error, Result};
use crate::structure_lock::{Backoff, StructureLock};

/// A structure that can be driven by a [`FlatCombiner`].
pub trait Combinable: Send {
    /// Deferred operation stored in a publication record.
    type Op: Copy + Send + fmt::Debug;

    /// Apply one published operation. Errors are logged by the combiner and
    /// the record is skipped.
    fn apply(&mut self, op: Self::Op) -> Result<()>;

    /// Called once at the end of every pass that touched at least one record.
    fn finish_pass(&mut self) {}
}

/// Collect `len` items into a boxed slice, failing instead of aborting when
/// the allocation cannot be made.
pub(crate) fn try_boxed_slice<X>(len: usize, make: impl FnMut(usize) -> X) -> Result<Box<[X]>> {
    let mut items = Vec::new();
    items.try_reserve_exact(len)?;
    items.extend((0..len).map(make));
    Ok(items.into_boxed_slice())
}

struct PublicationList<Op> {
    // Processors with records waiting
    presence: AtomicBitmap,
    // Per-processor pending slots
    pending: Box<[AtomicBitmap]>,
    records: Box<[UnsafeCell<Option<Op>>]>,
    // Slots handed out but not yet published
    reserved: Box<[AtomicBitmap]>,
    // Next slot to hand out per processor
    cursors: Box<[AtomicUsize]>,
    // Next slot the combiner will drain; touched only under the lock
    drain_cursors: Box<[AtomicUsize]>,
    records_per_processor: usize,
}

impl<Op> PublicationList<Op> {
    fn new(processors: usize, records_per_processor: usize) -> Result<Self> {
        Ok(PublicationList {
            presence: AtomicBitmap::new(),
            pending: try_boxed_slice(processors, |_| AtomicBitmap::new())?,
            records: try_boxed_slice(processors * records_per_processor, |_| {
                UnsafeCell::new(None)
            })?,
            reserved: try_boxed_slice(processors, |_| AtomicBitmap::new())?,
            cursors: try_boxed_slice(processors, |_| AtomicUsize::new(0))?,
            drain_cursors: try_boxed_slice(processors, |_| AtomicUsize::new(0))?,
            records_per_processor,
        })
    }

    #[inline]
    fn record(&self, cpu: usize, slot: usize) -> &UnsafeCell<Option<Op>> {
        &self.records[cpu * self.records_per_processor + slot]
    }

    #[inline]
    fn successor(&self, slot: usize) -> usize {
        (slot + 1) % self.records_per_processor
    }
}

/// Point-in-time view of the publication list, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationSnapshot {
    pub presence: CpuMask,
    /// Pending record count per processor.
    pub pending: Vec<usize>,
}

impl PublicationSnapshot {
    pub fn total_pending(&self) -> usize {
        self.pending.iter().sum()
    }
}

/// Flat-combining wrapper around a structure `T`.
///
/// Processors publish operations into their own records and at most one of
/// them at a time, the combiner, applies everything pending to `T`.
///
/// A processor id must be used by at most one thread at a time; ids outside
/// the configured range panic.
pub struct FlatCombiner<T: Combinable> {
    lock: StructureLock,
    structure: UnsafeCell<T>,
    publications: PublicationList<T::Op>,
}

// Records are handed between owner and combiner through the pending bits,
// and the structure is only reached with the lock held.
unsafe impl<T: Combinable> Sync for FlatCombiner<T> {}

impl<T: Combinable> FlatCombiner<T> {
    pub fn new(structure: T, processors: usize, records_per_processor: usize) -> Result<Self> {
        if processors == 0 || processors > BITMAP_WIDTH {
            return Err(Error::InvalidConfig {
                field: "processors",
                reason: "must be between 1 and 64",
            });
        }
        if records_per_processor == 0 || records_per_processor > BITMAP_WIDTH {
            return Err(Error::InvalidConfig {
                field: "records_per_processor",
                reason: "must be between 1 and 64",
            });
        }

        Ok(FlatCombiner {
            lock: StructureLock::new(),
            structure: UnsafeCell::new(structure),
            publications: PublicationList::new(processors, records_per_processor)?,
        })
    }

    pub fn processors(&self) -> usize {
        self.publications.pending.len()
    }

    pub fn records_per_processor(&self) -> usize {
        self.publications.records_per_processor
    }

    /// Reserve the next record of `cpu`'s ring.
    ///
    /// If that record is still pending the ring is full; the caller then
    /// advertises itself and keeps trying to become the combiner until some
    /// pass has drained the record. Each call reserves a distinct record, and
    /// records are drained in reservation order, so a reserved record holds
    /// back the ones reserved after it until it is published or dropped.
    /// Holding a whole ring of reservations while asking for another spins
    /// forever.
    pub fn acquire_record(&self, cpu: usize) -> RecordSlot<'_, T> {
        let list = &self.publications;
        let mut backoff = Backoff::new();

        loop {
            let slot = list.cursors[cpu].load(Ordering::Acquire);

            if list.pending[cpu].test(slot) {
                list.presence.set(cpu);
                fence(Ordering::SeqCst);
                if self.try_combine().is_none() {
                    backoff.spin();
                }
                continue;
            }

            if list.reserved[cpu].test_and_set(slot) {
                backoff.spin();
                continue;
            }

            // The record is ours only if it is still the next one in line
            let next = list.successor(slot);
            if list.pending[cpu].test(slot)
                || list.cursors[cpu]
                    .compare_exchange(slot, next, Ordering::AcqRel, Ordering::Relaxed)
                    .is_err()
            {
                list.reserved[cpu].clear(slot);
                backoff.spin();
                continue;
            }

            return RecordSlot {
                combiner: self,
                cpu,
                slot,
            };
        }
    }

    // Hand a reserved slot to the combiner.
    fn publish_record(&self, cpu: usize, slot: usize) {
        let list = &self.publications;
        list.pending[cpu].set(slot);
        list.reserved[cpu].clear(slot);
        list.presence.set(cpu);
        // Pairs with the fence in try_combine: either our lock attempt sees
        // the lock free, or the holder sees our presence bit after unlocking
        fence(Ordering::SeqCst);
    }

    /// Publish `op` for `cpu` and make one attempt at combining.
    pub fn submit(&self, cpu: usize, op: T::Op) {
        self.acquire_record(cpu).publish(op);
        self.try_combine();
    }

    /// Try to become the combiner.
    ///
    /// Returns `None` when another processor holds the lock, otherwise the
    /// number of records touched. Work that shows up while the lock is held
    /// is picked up by re-checking the presence bitmap after unlocking.
    pub fn try_combine(&self) -> Option<usize> {
        let mut touched = 0;
        let mut combined = false;

        loop {
            if !self.lock.try_lock() {
                return combined.then_some(touched);
            }
            combined = true;

            // SAFETY: the structure lock is held
            let structure = unsafe { &mut *self.structure.get() };
            let applied = self.drain(structure);
            if applied > 0 {
                structure.finish_pass();
                trace!(records = applied, "combining pass");
            }
            touched += applied;

            self.lock.unlock();
            fence(Ordering::SeqCst);

            if self.publications.presence.is_empty() {
                return Some(touched);
            }
        }
    }

    fn drain(&self, structure: &mut T) -> usize {
        let list = &self.publications;
        let mut touched = 0;

        while let Some(cpu) = list.presence.find_highest_set() {
            // Clear before draining so a record published meanwhile re-raises it
            list.presence.clear(cpu);

            let mut slot = list.drain_cursors[cpu].load(Ordering::Relaxed);
            while list.pending[cpu].test(slot) {
                // SAFETY: the pending bit gives the combiner the record until cleared
                let record = unsafe { (*list.record(cpu, slot).get()).take() };

                match record {
                    Some(op) => {
                        if let Err(err) = structure.apply(op) {
                            error!(cpu, slot, ?op, %err, "skipping rejected publication record");
                        }
                    }
                    None => trace!(cpu, slot, "skipping abandoned publication record"),
                }

                list.pending[cpu].clear(slot);
                touched += 1;
                slot = list.successor(slot);
            }
            list.drain_cursors[cpu].store(slot, Ordering::Relaxed);
        }

        touched
    }

    /// Spin until the structure lock is held, bypassing combining.
    pub fn lock(&self) -> StructureGuard<'_, T> {
        self.lock.lock();
        StructureGuard { combiner: self }
    }

    pub fn try_lock(&self) -> Option<StructureGuard<'_, T>> {
        self.lock
            .try_lock()
            .then(|| StructureGuard { combiner: self })
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Exclusive access without locking.
    pub fn structure_mut(&mut self) -> &mut T {
        self.structure.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.structure.into_inner()
    }

    /// Log the presence bitmap and per-processor pending counts at trace level.
    pub fn dump(&self) -> PublicationSnapshot {
        let list = &self.publications;
        let snapshot = PublicationSnapshot {
            presence: list.presence.load(),
            pending: list.pending.iter().map(AtomicBitmap::count).collect(),
        };

        trace!(presence = ?snapshot.presence, "publication list");
        for (cpu, bitmap) in list.pending.iter().enumerate() {
            trace!(cpu, pending = snapshot.pending[cpu], slots = ?bitmap.load(), "publication records");
        }

        snapshot
    }
}

impl<T: Combinable + fmt::Debug> fmt::Debug for FlatCombiner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatCombiner")
            .field("locked", &self.lock.is_locked())
            .field("presence", &self.publications.presence)
            .finish_non_exhaustive()
    }
}

/// A reserved publication record.
#[must_use = "a reserved record does nothing until published"]
pub struct RecordSlot<'a, T: Combinable> {
    combiner: &'a FlatCombiner<T>,
    cpu: usize,
    slot: usize,
}

impl<T: Combinable> RecordSlot<'_, T> {
    pub fn cpu(&self) -> usize {
        self.cpu
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Fill the record and mark it pending.
    pub fn publish(self, op: T::Op) {
        let list = &self.combiner.publications;
        // SAFETY: the reserved bit is ours and the pending bit is clear, so
        // nobody else reads or writes this record
        unsafe { *list.record(self.cpu, self.slot).get() = Some(op) };
    }
}

// An unpublished record goes to the combiner empty so later records of the
// same ring are not held back.
impl<T: Combinable> Drop for RecordSlot<'_, T> {
    fn drop(&mut self) {
        self.combiner.publish_record(self.cpu, self.slot);
    }
}

/// Exclusive access to the combined structure; unlocks on drop.
pub struct StructureGuard<'a, T: Combinable> {
    combiner: &'a FlatCombiner<T>,
}

impl<T: Combinable> Deref for StructureGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the structure lock
        unsafe { &*self.combiner.structure.get() }
    }
}

impl<T: Combinable> DerefMut for StructureGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the structure lock
        unsafe { &mut *self.combiner.structure.get() }
    }
}

impl<T: Combinable> Drop for StructureGuard<'_, T> {
    fn drop(&mut self) {
        self.combiner.lock.unlock();
        fence(Ordering::SeqCst);
        // Publishers that failed against us may have nobody else to drain them
        if !self.combiner.publications.presence.is_empty() {
            self.combiner.try_combine();
        }
    }
}
