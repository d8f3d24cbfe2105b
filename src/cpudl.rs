//! Global processor deadline tracking.
//!
//! [`Cpudl`] answers "which processor should a deadline task be pushed to"
//! and "which processor should a task be pulled from" without making every
//! scheduling event serialize on one lock:
//!
//! * updates go through a [`FlatCombiner`] and are applied to the deadline
//!   skip list in batches by whichever processor wins the structure lock;
//! * queries read the free-processor set and the [`CachedBest`] slot
//!   directly, never taking the lock.
//!
//! ```text
//!  set_deadline(cpu, dl, valid)
//!        │
//!        ├──► CachedBest (CAS fast path)
//!        │
//!        └──► publication record ──► combiner ──► SkipList ──► repair CachedBest
//!
//!  find_best(query) ──► free set ∩ affinity ──► CachedBest
//! ```

use std::sync::Arc;

use tracing::{debug, trace};

use crate::bitmap::{AtomicBitmap, CpuMask};
use crate::cached_best::CachedBest;
use crate::config::CpudlConfig;
use crate::error::{Error, Result};
use crate::flat_combining::{Combinable, FlatCombiner, PublicationSnapshot, StructureGuard};
use crate::order::DeadlineOrder;
use crate::skiplist::SkipList;

/// Deferred update published by a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Replace `cpu`'s deadline, or withdraw it when `valid` is false.
    SetDeadline { cpu: usize, deadline: u64, valid: bool },
}

/// The structure protected by the combiner: the skip list plus the handle it
/// uses to repair the cached best processor.
pub struct DeadlineIndex<O> {
    list: SkipList<O>,
    best: Arc<CachedBest>,
}

impl<O: DeadlineOrder> DeadlineIndex<O> {
    pub fn new(list: SkipList<O>, best: Arc<CachedBest>) -> Self {
        DeadlineIndex { list, best }
    }

    pub fn list(&self) -> &SkipList<O> {
        &self.list
    }

    pub fn cached_best(&self) -> &CachedBest {
        &self.best
    }

    fn set_deadline(&mut self, cpu: usize, deadline: u64, valid: bool) -> Result<()> {
        let processors = self.list.processors();
        if cpu >= processors {
            return Err(Error::UnknownProcessor { cpu, processors });
        }

        // Updates are always remove-then-insert
        self.list.remove(cpu);
        if valid {
            self.list.insert(cpu, deadline);
        }
        Ok(())
    }
}

impl<O: DeadlineOrder> Combinable for DeadlineIndex<O> {
    type Op = Operation;

    fn apply(&mut self, op: Operation) -> Result<()> {
        match op {
            Operation::SetDeadline {
                cpu,
                deadline,
                valid,
            } => self.set_deadline(cpu, deadline, valid),
        }
    }

    fn finish_pass(&mut self) {
        self.best.repair(self.list.best().map(|(cpu, _)| cpu));
    }
}

/// Parameters of a [`Cpudl::find_best`] lookup.
///
/// A pull passes nothing. A push passes the task's affinity and deadline,
/// plus optionally the set of processors that may receive work at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindQuery {
    pub affinity: Option<CpuMask>,
    pub runnable: Option<CpuMask>,
    pub deadline: Option<u64>,
}

impl FindQuery {
    pub fn pull() -> Self {
        FindQuery::default()
    }

    pub fn push(affinity: CpuMask, deadline: u64) -> Self {
        FindQuery {
            affinity: Some(affinity),
            runnable: None,
            deadline: Some(deadline),
        }
    }

    pub fn with_affinity(mut self, affinity: CpuMask) -> Self {
        self.affinity = Some(affinity);
        self
    }

    pub fn with_runnable(mut self, runnable: CpuMask) -> Self {
        self.runnable = Some(runnable);
        self
    }

    pub fn with_deadline(mut self, deadline: u64) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Tracks the best deadline across processors.
///
/// Each processor id must be driven by one thread at a time (in a scheduler,
/// the thread holding that processor's runqueue lock). Methods taking a
/// processor id panic if it is out of range.
pub struct Cpudl<O: DeadlineOrder> {
    engine: FlatCombiner<DeadlineIndex<O>>,
    best: Arc<CachedBest>,
    free: Arc<AtomicBitmap>,
    order: O,
}

impl<O: DeadlineOrder + Clone> Cpudl<O> {
    /// Allocate every node, record and snapshot up front.
    pub fn new(config: CpudlConfig, order: O) -> Result<Self> {
        config.validate()?;

        let list = SkipList::new(&config, order.clone())?;
        let free = list.free_set();
        let best = Arc::new(CachedBest::new(config.processors)?);
        let index = DeadlineIndex::new(list, Arc::clone(&best));
        let engine = FlatCombiner::new(index, config.processors, config.records_per_processor)?;

        debug!(
            processors = config.processors,
            records_per_processor = config.records_per_processor,
            max_level = config.max_level,
            "cpudl initialised"
        );

        Ok(Cpudl {
            engine,
            best,
            free,
            order,
        })
    }
}

impl<O: DeadlineOrder> Cpudl<O> {
    pub fn processors(&self) -> usize {
        self.engine.processors()
    }

    pub fn order(&self) -> &O {
        &self.order
    }

    /// Report `cpu`'s current deadline, or that it has none.
    ///
    /// The cached slot is updated right away; the skip list update is queued
    /// and applied by the next combining pass, possibly this call's own.
    ///
    /// # Panics
    ///
    /// Panics if `cpu` is not below [`processors`](Self::processors).
    pub fn set_deadline(&self, cpu: usize, deadline: u64, valid: bool) {
        assert!(
            cpu < self.processors(),
            "processor {} out of range ({} tracked)",
            cpu,
            self.processors()
        );

        if valid {
            self.best.publish(cpu, deadline, &self.order);
        } else {
            self.best.invalidate(cpu);
        }

        self.engine.submit(
            cpu,
            Operation::SetDeadline {
                cpu,
                deadline,
                valid,
            },
        );
    }

    /// Pick a processor for a push or a pull.
    ///
    /// With an affinity mask, any free processor inside it (and inside the
    /// runnable mask, if given) wins outright. Otherwise the cached best
    /// processor is returned, after checking it against the affinity mask
    /// and requester deadline when those are given.
    pub fn find_best(&self, query: &FindQuery) -> Option<usize> {
        if let Some(cpu) = self.free_candidates(query).first() {
            return Some(cpu);
        }
        self.checked_cached(query)
    }

    /// Like [`find_best`](Self::find_best) but returns every acceptable free
    /// processor, or the single cached one.
    pub fn find_candidates(&self, query: &FindQuery) -> CpuMask {
        let free = self.free_candidates(query);
        if !free.is_empty() {
            return free;
        }
        self.checked_cached(query)
            .map_or(CpuMask::EMPTY, CpuMask::single)
    }

    fn free_candidates(&self, query: &FindQuery) -> CpuMask {
        let Some(affinity) = query.affinity else {
            return CpuMask::EMPTY;
        };

        let mut candidates = affinity & self.free.load();
        if let Some(runnable) = query.runnable {
            candidates &= runnable;
        }
        candidates
    }

    fn checked_cached(&self, query: &FindQuery) -> Option<usize> {
        let cpu = self.best.get()?;

        if let Some(affinity) = query.affinity {
            if !affinity.contains(cpu) {
                return None;
            }
        }
        if let Some(deadline) = query.deadline {
            if !self.order.is_better(self.best.deadline_of(cpu), deadline) {
                return None;
            }
        }

        Some(cpu)
    }

    /// Currently cached best processor.
    pub fn cached_best(&self) -> Option<usize> {
        self.best.get()
    }

    /// Processors without a valid deadline, as last applied by a combiner.
    pub fn free_set(&self) -> CpuMask {
        self.free.load()
    }

    /// Apply every pending record now if the structure lock is free.
    pub fn combine(&self) -> Option<usize> {
        self.engine.try_combine()
    }

    /// Exclusive, blocking access to the skip list; unlocks when dropped.
    pub fn lock_structure(&self) -> StructureGuard<'_, DeadlineIndex<O>> {
        self.engine.lock()
    }

    /// Trace the publication list, cache and free set.
    pub fn dump(&self) -> PublicationSnapshot {
        let snapshot = self.engine.dump();
        trace!(
            cached = ?self.best.get(),
            free = ?self.free.load(),
            "cpudl state"
        );
        snapshot
    }
}
