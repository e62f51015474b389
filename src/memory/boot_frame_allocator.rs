//! Boot Frame Allocator
//!
//! Provides a way to hand out physical pages before the bitmap allocator is
//! ready. Allocation is a one-way bump over the raw range; nothing handed
//! out here is ever reclaimed, and whatever is left when the subsystem
//! bootstraps becomes the allocatable frame pool.

use super::addresses::PhysAddr;
use crate::constants::memory::PAGE_SIZE;

pub struct BootFrameAllocator {
    next: PhysAddr,
    end: PhysAddr,
}

impl BootFrameAllocator {
    pub fn new(start: PhysAddr, end: PhysAddr) -> Self {
        assert!(start.is_page_aligned() && end.is_page_aligned());
        assert!(start < end);
        Self { next: start, end }
    }

    /// Bump out `npages` contiguous pages, or `None` once the raw range is
    /// gone.
    pub fn steal(&mut self, npages: usize) -> Option<PhysAddr> {
        assert!(npages >= 1);
        let bytes = npages * PAGE_SIZE;
        if self.end.0 - self.next.0 < bytes {
            return None;
        }
        let addr = self.next;
        self.next = PhysAddr(self.next.0 + bytes);
        Some(addr)
    }

    /// The still-untouched tail of the raw range.
    pub fn remaining(&self) -> (PhysAddr, PhysAddr) {
        (self.next, self.end)
    }
}
