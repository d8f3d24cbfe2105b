use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use crate::CACHE_LINE_SIZE;
use crate::error::{Error, Result};
use crate::node::SkipListNode;

/// Fixed arena holding one [`SkipListNode`] per processor plus the head
/// sentinel, each on its own cache line.
///
/// Nodes are created once and only ever relinked; nothing is freed until the
/// arena itself is dropped.
pub struct NodeArena {
    base: NonNull<u8>,
    layout: Layout,
    stride: usize,
    len: usize,
}

// The arena exclusively owns plain-data nodes.
unsafe impl Send for NodeArena {}
unsafe impl Sync for NodeArena {}

impl NodeArena {
    /// Allocate `processors` detached nodes followed by the head sentinel.
    pub fn new(processors: usize) -> Result<Self> {
        let align = (*CACHE_LINE_SIZE).max(std::mem::align_of::<SkipListNode>());

        // Round each slot up to the alignment so every node starts a cache line
        let node_size = std::mem::size_of::<SkipListNode>();
        let stride = (node_size + align - 1) & !(align - 1);

        let len = processors + 1;
        let bytes = stride.checked_mul(len).ok_or(Error::OutOfMemory {
            bytes: usize::MAX,
        })?;
        let layout = Layout::from_size_align(bytes, align)?;

        let base = NonNull::new(unsafe { alloc(layout) }).ok_or(Error::OutOfMemory { bytes })?;

        let arena = NodeArena {
            base,
            layout,
            stride,
            len,
        };

        for index in 0..len {
            let cpu = if index == processors {
                SkipListNode::HEAD_CPU
            } else {
                index as u32
            };
            unsafe { arena.slot(index).write(SkipListNode::detached(cpu)) };
        }

        Ok(arena)
    }

    #[inline]
    fn slot(&self, index: usize) -> *mut SkipListNode {
        debug_assert!(index < self.len);
        unsafe { self.base.as_ptr().add(index * self.stride) as *mut SkipListNode }
    }

    /// Number of nodes, head sentinel included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Arena index of the head sentinel.
    pub fn head(&self) -> usize {
        self.len - 1
    }

    #[inline]
    pub fn get(&self, index: usize) -> &SkipListNode {
        assert!(index < self.len, "node index {} out of bounds", index);
        unsafe { &*self.slot(index) }
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> &mut SkipListNode {
        assert!(index < self.len, "node index {} out of bounds", index);
        unsafe { &mut *self.slot(index) }
    }
}

impl Drop for NodeArena {
    fn drop(&mut self) {
        // Nodes hold no resources, only the block itself needs releasing
        unsafe { dealloc(self.base.as_ptr(), self.layout) }
    }
}
