//! Fixed-width bitmaps shared between processors.
//!
//! [`AtomicBitmap`] is the building block of the publication list and the
//! free-processor set: writers publish with release ordering, readers observe
//! with acquire ordering, so a bit that is seen clear never hides unapplied
//! data. [`CpuMask`] is the plain value type for snapshots and affinity masks.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr};
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of bits in one bitmap word.
pub const BITMAP_WIDTH: usize = u64::BITS as usize;

#[inline(always)]
const fn bit(n: usize) -> u64 {
    debug_assert!(n < BITMAP_WIDTH, "bit index out of range");
    1u64 << n
}

/// A 64-bit atomic bitmap.
pub struct AtomicBitmap {
    bits: AtomicU64,
}

impl Default for AtomicBitmap {
    fn default() -> Self {
        AtomicBitmap::new()
    }
}

impl AtomicBitmap {
    pub const fn new() -> Self {
        AtomicBitmap {
            bits: AtomicU64::new(0),
        }
    }

    /// Bitmap with bits `0..n` set.
    pub fn filled(n: usize) -> Self {
        let bitmap = AtomicBitmap::new();
        bitmap.fill(n);
        bitmap
    }

    /// Set bit `n`, release ordered.
    #[inline]
    pub fn set(&self, n: usize) {
        debug_assert!(n < BITMAP_WIDTH);
        self.bits.fetch_or(bit(n), Ordering::Release);
    }

    /// Clear bit `n`, release ordered.
    #[inline]
    pub fn clear(&self, n: usize) {
        debug_assert!(n < BITMAP_WIDTH);
        self.bits.fetch_and(!bit(n), Ordering::Release);
    }

    /// Set bit `n` and report whether it was already set.
    #[inline]
    pub fn test_and_set(&self, n: usize) -> bool {
        debug_assert!(n < BITMAP_WIDTH);
        self.bits.fetch_or(bit(n), Ordering::AcqRel) & bit(n) != 0
    }

    /// Test bit `n` after an acquire load.
    #[inline]
    pub fn test(&self, n: usize) -> bool {
        debug_assert!(n < BITMAP_WIDTH);
        self.bits.load(Ordering::Acquire) & bit(n) != 0
    }

    /// Index of the highest set bit, or `None` when the bitmap is empty.
    #[inline]
    pub fn find_highest_set(&self) -> Option<usize> {
        CpuMask(self.bits.load(Ordering::Acquire)).last()
    }

    /// Replace the contents with bits `0..n`.
    pub fn fill(&self, n: usize) {
        self.bits.store(CpuMask::first_n(n).0, Ordering::Release);
    }

    #[inline]
    pub fn load(&self) -> CpuMask {
        CpuMask(self.bits.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.load(Ordering::Acquire) == 0
    }

    pub fn count(&self) -> usize {
        self.bits.load(Ordering::Acquire).count_ones() as usize
    }
}

impl fmt::Debug for AtomicBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicBitmap").field(&self.load()).finish()
    }
}

/// A plain set of processor ids below [`BITMAP_WIDTH`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CpuMask(u64);

impl CpuMask {
    pub const EMPTY: CpuMask = CpuMask(0);

    pub const fn from_bits(bits: u64) -> Self {
        CpuMask(bits)
    }

    /// Mask holding processors `0..n`.
    pub const fn first_n(n: usize) -> Self {
        if n >= BITMAP_WIDTH {
            CpuMask(u64::MAX)
        } else {
            CpuMask(bit(n) - 1)
        }
    }

    pub const fn single(cpu: usize) -> Self {
        CpuMask(bit(cpu))
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn insert(&mut self, cpu: usize) {
        self.0 |= bit(cpu);
    }

    pub fn remove(&mut self, cpu: usize) {
        self.0 &= !bit(cpu);
    }

    pub const fn contains(self, cpu: usize) -> bool {
        cpu < BITMAP_WIDTH && self.0 & bit(cpu) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Lowest processor in the mask.
    pub fn first(self) -> Option<usize> {
        (self.0 != 0).then(|| self.0.trailing_zeros() as usize)
    }

    /// Highest processor in the mask.
    pub fn last(self) -> Option<usize> {
        (self.0 != 0).then(|| BITMAP_WIDTH - 1 - self.0.leading_zeros() as usize)
    }

    /// Processors in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        let mut rest = self.0;
        std::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            let cpu = rest.trailing_zeros() as usize;
            rest &= rest - 1;
            Some(cpu)
        })
    }
}

impl BitAnd for CpuMask {
    type Output = CpuMask;

    fn bitand(self, rhs: CpuMask) -> CpuMask {
        CpuMask(self.0 & rhs.0)
    }
}

impl BitAndAssign for CpuMask {
    fn bitand_assign(&mut self, rhs: CpuMask) {
        self.0 &= rhs.0;
    }
}

impl BitOr for CpuMask {
    type Output = CpuMask;

    fn bitor(self, rhs: CpuMask) -> CpuMask {
        CpuMask(self.0 | rhs.0)
    }
}

impl FromIterator<usize> for CpuMask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut mask = CpuMask::EMPTY;
        for cpu in iter {
            mask.insert(cpu);
        }
        mask
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn set_clear_test() {
        let bitmap = AtomicBitmap::new();
        assert!(bitmap.is_empty());

        bitmap.set(3);
        bitmap.set(63);
        assert!(bitmap.test(3));
        assert!(bitmap.test(63));
        assert!(!bitmap.test(4));
        assert_eq!(bitmap.count(), 2);

        bitmap.clear(3);
        assert!(!bitmap.test(3));
        assert!(bitmap.test(63));

        // Clearing an already clear bit is harmless
        bitmap.clear(3);
        assert_eq!(bitmap.count(), 1);
    }

    #[test]
    fn highest_set_bit_scan() {
        let bitmap = AtomicBitmap::new();
        assert_eq!(bitmap.find_highest_set(), None);

        bitmap.set(0);
        assert_eq!(bitmap.find_highest_set(), Some(0));

        bitmap.set(17);
        bitmap.set(5);
        assert_eq!(bitmap.find_highest_set(), Some(17));

        // Draining highest-first visits every bit exactly once
        let mut order = Vec::new();
        while let Some(n) = bitmap.find_highest_set() {
            order.push(n);
            bitmap.clear(n);
        }
        assert_eq!(order, vec![17, 5, 0]);
        assert!(bitmap.is_empty());
    }

    #[test]
    fn filled_bitmap() {
        let bitmap = AtomicBitmap::filled(5);
        assert_eq!(bitmap.load(), CpuMask::from_bits(0b11111));

        let full = AtomicBitmap::filled(64);
        assert_eq!(full.count(), 64);
        assert_eq!(full.find_highest_set(), Some(63));
    }

    #[test]
    fn cpu_mask_operations() {
        let mask: CpuMask = [1, 4, 9].into_iter().collect();
        assert_eq!(mask.len(), 3);
        assert!(mask.contains(4));
        assert!(!mask.contains(5));
        assert!(!mask.contains(200));
        assert_eq!(mask.first(), Some(1));
        assert_eq!(mask.last(), Some(9));
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![1, 4, 9]);

        let other: CpuMask = [4, 9, 12].into_iter().collect();
        assert_eq!((mask & other).iter().collect::<Vec<_>>(), vec![4, 9]);
        assert_eq!((mask | other).len(), 4);

        let mut shrinking = mask;
        shrinking.remove(1);
        shrinking &= CpuMask::single(9);
        assert_eq!(shrinking, CpuMask::single(9));

        assert_eq!(CpuMask::EMPTY.first(), None);
        assert_eq!(format!("{:?}", mask), "{1, 4, 9}");
    }

    #[test]
    fn test_and_set_reports_previous_state() {
        let bitmap = AtomicBitmap::new();
        assert!(!bitmap.test_and_set(7));
        assert!(bitmap.test_and_set(7));
        bitmap.clear(7);
        assert!(!bitmap.test_and_set(7));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "bit index out of range")]
    fn mask_rejects_ids_past_the_word() {
        let _ = [70].into_iter().collect::<CpuMask>();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "bit index out of range")]
    fn single_rejects_ids_past_the_word() {
        let _ = CpuMask::single(BITMAP_WIDTH);
    }

    #[test]
    fn concurrent_set_and_clear() {
        let bitmap = Arc::new(AtomicBitmap::new());
        let num_threads = 8;
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles: Vec<_> = (0..num_threads)
            .map(|thread_id| {
                let bitmap = Arc::clone(&bitmap);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    // Each thread owns eight bits; toggle them many times
                    for round in 0..1000 {
                        for offset in 0..8 {
                            let n = thread_id * 8 + offset;
                            if round % 2 == 0 {
                                bitmap.set(n);
                            } else {
                                bitmap.clear(n);
                            }
                        }
                    }
                    for offset in 0..8 {
                        bitmap.set(thread_id * 8 + offset);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(bitmap.count(), 64);
    }
}
