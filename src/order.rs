/// Decides which of two deadlines is "better" for the structure's purpose.
///
/// The skip list keeps its best entry first and the cached slot tracks the
/// best processor, so the direction is entirely up to the caller: a push
/// structure looks for the latest deadline, a pull structure for the earliest.
pub trait DeadlineOrder: Send + Sync {
    /// `true` when `a` is strictly better than `b`.
    fn is_better(&self, a: u64, b: u64) -> bool;
}

/// Earlier deadlines win. Wrap-safe, like the kernel's `dl_time_before`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EarliestFirst;

impl DeadlineOrder for EarliestFirst {
    #[inline]
    fn is_better(&self, a: u64, b: u64) -> bool {
        (a.wrapping_sub(b) as i64) < 0
    }
}

/// Later deadlines win.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatestFirst;

impl DeadlineOrder for LatestFirst {
    #[inline]
    fn is_better(&self, a: u64, b: u64) -> bool {
        (b.wrapping_sub(a) as i64) < 0
    }
}

impl<F> DeadlineOrder for F
where
    F: Fn(u64, u64) -> bool + Send + Sync,
{
    #[inline]
    fn is_better(&self, a: u64, b: u64) -> bool {
        self(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earliest_first() {
        assert!(EarliestFirst.is_better(10, 20));
        assert!(!EarliestFirst.is_better(20, 10));
        assert!(!EarliestFirst.is_better(10, 10));
    }

    #[test]
    fn latest_first() {
        assert!(LatestFirst.is_better(200, 100));
        assert!(!LatestFirst.is_better(100, 200));
        assert!(!LatestFirst.is_better(7, 7));
    }

    #[test]
    fn comparisons_survive_clock_wrap() {
        let just_before_wrap = u64::MAX - 5;
        let just_after_wrap = 3;
        assert!(EarliestFirst.is_better(just_before_wrap, just_after_wrap));
        assert!(LatestFirst.is_better(just_after_wrap, just_before_wrap));
    }

    #[test]
    fn closures_are_orders() {
        let plain = |a: u64, b: u64| a > b;
        assert!(plain.is_better(2, 1));
        assert!(!plain.is_better(1, 2));
    }
}
