/// Hard ceiling on skip list levels; the configured level count may be lower.
pub const MAX_LEVEL: usize = 16;

/// Height value of a node that is not linked into the list.
pub const NOT_IN_LIST: i32 = -1;

/// Per-processor skip list entry
#[repr(C, align(64))] // Align to cache line boundaries
pub struct SkipListNode {
    // Frequently accessed data in the first cache line
    pub(crate) deadline: u64,
    // Topmost level this node is linked at, or NOT_IN_LIST
    pub(crate) height: i32,
    // Owning processor (the head sentinel uses u32::MAX)
    pub(crate) cpu: u32,
    // Arena indices of the neighbours at each level
    pub(crate) next: [Option<u32>; MAX_LEVEL],
    pub(crate) prev: [u32; MAX_LEVEL],
}

impl SkipListNode {
    pub(crate) const HEAD_CPU: u32 = u32::MAX;

    pub(crate) fn detached(cpu: u32) -> Self {
        SkipListNode {
            deadline: 0,
            height: NOT_IN_LIST,
            cpu,
            next: [None; MAX_LEVEL],
            prev: [0; MAX_LEVEL],
        }
    }

    #[inline]
    pub fn is_linked(&self) -> bool {
        self.height != NOT_IN_LIST
    }

    #[inline]
    pub fn deadline(&self) -> u64 {
        self.deadline
    }

    #[inline]
    pub fn height(&self) -> i32 {
        self.height
    }

    #[inline]
    pub fn cpu(&self) -> u32 {
        self.cpu
    }
}
