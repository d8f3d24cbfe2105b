use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::bitmap::AtomicBitmap;
use crate::config::CpudlConfig;
use crate::error::{Error, Result};
use crate::node::{MAX_LEVEL, NOT_IN_LIST, SkipListNode};
use crate::node_allocator::NodeArena;
use crate::order::DeadlineOrder;

/// Skip list of processor deadlines, best deadline first.
///
/// Every processor owns exactly one preallocated node, so insertion and
/// removal only relink nodes. The list is not synchronized: it is meant to be
/// mutated by whoever holds the flat-combining structure lock. The free set
/// is the one piece readers may look at without that lock.
pub struct SkipList<O> {
    nodes: NodeArena,
    // Topmost level currently in use
    level: usize,
    max_level: usize,
    level_probability: f64,
    len: usize,
    free: Arc<AtomicBitmap>,
    order: O,
    rng: SmallRng,
}

impl<O: DeadlineOrder> SkipList<O> {
    /// Create an empty list; every processor starts out free.
    pub fn new(config: &CpudlConfig, order: O) -> Result<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_rng(&mut rand::rng()),
        };

        Ok(SkipList {
            nodes: NodeArena::new(config.processors)?,
            level: 0,
            max_level: config.max_level,
            level_probability: config.level_probability,
            len: 0,
            free: Arc::new(AtomicBitmap::filled(config.processors)),
            order,
            rng,
        })
    }

    fn random_level(&mut self) -> usize {
        // Geometric height, never more than one level above the current top
        let cap = (self.level + 1).min(self.max_level - 1);
        let mut level = 0;

        while level < cap && self.rng.random_bool(self.level_probability) {
            level += 1;
        }

        level
    }

    #[inline]
    fn head(&self) -> usize {
        self.nodes.head()
    }

    #[inline]
    fn next(&self, index: usize, level: usize) -> Option<usize> {
        self.nodes.get(index).next[level].map(|next| next as usize)
    }

    /// Number of processors tracked.
    pub fn processors(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Processors currently holding a valid deadline.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Topmost level in use (0 for an empty list).
    pub fn height(&self) -> usize {
        self.level
    }

    pub fn order(&self) -> &O {
        &self.order
    }

    /// Processors without a valid deadline, shared with lock-free readers.
    pub fn free_set(&self) -> Arc<AtomicBitmap> {
        Arc::clone(&self.free)
    }

    pub fn is_linked(&self, cpu: usize) -> bool {
        self.nodes.get(cpu).is_linked()
    }

    /// Deadline of `cpu` if it is in the list.
    pub fn deadline_of(&self, cpu: usize) -> Option<u64> {
        let node = self.nodes.get(cpu);
        node.is_linked().then_some(node.deadline)
    }

    /// The processor with the best deadline.
    pub fn best(&self) -> Option<(usize, u64)> {
        self.next(self.head(), 0)
            .map(|cpu| (cpu, self.nodes.get(cpu).deadline))
    }

    /// Entries from best to worst.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        let mut cursor = self.next(self.head(), 0);
        std::iter::from_fn(move || {
            let cpu = cursor?;
            cursor = self.next(cpu, 0);
            Some((cpu, self.nodes.get(cpu).deadline))
        })
    }

    /// Link `cpu` with `deadline`, replacing any entry it already has.
    pub fn insert(&mut self, cpu: usize, deadline: u64) {
        debug_assert!(cpu < self.processors(), "cpu {cpu} out of range");
        if self.is_linked(cpu) {
            self.remove(cpu);
        }

        let head = self.head();
        let mut update = [head; MAX_LEVEL];

        // Walk down from the top, stopping in front of the first worse entry
        let mut x = head;
        for level in (0..=self.level).rev() {
            while let Some(next) = self.next(x, level) {
                if self.order.is_better(deadline, self.nodes.get(next).deadline) {
                    break;
                }
                x = next;
            }
            update[level] = x;
        }

        let new_level = self.random_level();
        if new_level > self.level {
            // At most one above the old top, whose predecessor is the head
            self.level = new_level;
            update[new_level] = head;
        }

        for (level, &pred) in update.iter().enumerate().take(new_level + 1) {
            let succ = self.nodes.get(pred).next[level];

            let node = self.nodes.get_mut(cpu);
            node.next[level] = succ;
            node.prev[level] = pred as u32;

            self.nodes.get_mut(pred).next[level] = Some(cpu as u32);
            if let Some(succ) = succ {
                self.nodes.get_mut(succ as usize).prev[level] = cpu as u32;
            }
        }

        let node = self.nodes.get_mut(cpu);
        node.deadline = deadline;
        node.height = new_level as i32;

        self.len += 1;
        self.free.clear(cpu);
    }

    /// Unlink `cpu` and return the deadline it had, or 0 if it was absent.
    pub fn remove(&mut self, cpu: usize) -> u64 {
        let node = self.nodes.get(cpu);
        if !node.is_linked() {
            return 0;
        }

        let height = node.height as usize;
        let deadline = node.deadline;
        let next = node.next;
        let prev = node.prev;

        for level in 0..=height {
            self.nodes.get_mut(prev[level] as usize).next[level] = next[level];
            if let Some(succ) = next[level] {
                self.nodes.get_mut(succ as usize).prev[level] = prev[level];
            }
        }

        let head = self.head();
        while self.level > 0 && self.nodes.get(head).next[self.level].is_none() {
            self.level -= 1;
        }

        let node = self.nodes.get_mut(cpu);
        node.height = NOT_IN_LIST;
        node.next = [None; MAX_LEVEL];

        self.len -= 1;
        self.free.set(cpu);

        deadline
    }

    /// Check every structural invariant, reporting the first violation found.
    pub fn validate(&self) -> Result<()> {
        let processors = self.processors();
        let head = self.head();
        let mut seen_levels = vec![0usize; processors];

        if self.level >= self.max_level {
            return Err(Error::Corrupted(format!(
                "height {} exceeds ceiling {}",
                self.level, self.max_level
            )));
        }
        if self.level > 0 && self.next(head, self.level).is_none() {
            return Err(Error::Corrupted(format!("top level {} is empty", self.level)));
        }
        if let Some(level) = (self.level + 1..MAX_LEVEL).find(|&l| self.next(head, l).is_some()) {
            return Err(Error::Corrupted(format!(
                "head linked at level {} above height {}",
                level, self.level
            )));
        }

        for level in 0..=self.level {
            let mut pred = head;
            let mut steps = 0;
            while let Some(cpu) = self.next(pred, level) {
                steps += 1;
                if cpu >= processors || steps > processors {
                    return Err(Error::Corrupted(format!("bad link at level {}", level)));
                }

                let node = self.nodes.get(cpu);
                if node.height < level as i32 {
                    return Err(Error::Corrupted(format!(
                        "cpu {} reachable at level {} above its height {}",
                        cpu, level, node.height
                    )));
                }
                if node.prev[level] as usize != pred {
                    return Err(Error::Corrupted(format!(
                        "cpu {} has a stale back link at level {}",
                        cpu, level
                    )));
                }
                if pred != head && self.order.is_better(node.deadline, self.nodes.get(pred).deadline)
                {
                    return Err(Error::Corrupted(format!(
                        "cpu {} is out of order at level {}",
                        cpu, level
                    )));
                }

                seen_levels[cpu] += 1;
                pred = cpu;
            }
        }

        let mut linked = 0;
        for (cpu, &levels) in seen_levels.iter().enumerate() {
            let node = self.nodes.get(cpu);
            let expected = if node.is_linked() {
                linked += 1;
                node.height as usize + 1
            } else {
                0
            };
            if levels != expected {
                return Err(Error::Corrupted(format!(
                    "cpu {} linked at {} levels, expected {}",
                    cpu, levels, expected
                )));
            }
            if self.free.test(cpu) == node.is_linked() {
                return Err(Error::Corrupted(format!(
                    "cpu {} free-set membership disagrees with the list",
                    cpu
                )));
            }
        }

        if linked != self.len {
            return Err(Error::Corrupted(format!(
                "length {} but {} linked nodes",
                self.len, linked
            )));
        }

        Ok(())
    }
}
