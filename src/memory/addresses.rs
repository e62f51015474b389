//! Address newtypes so physical addresses, virtual addresses, and frame
//! numbers can never be mixed up at a call site.

use core::fmt::{self, Debug, Formatter};

use crate::constants::memory::{PAGE_FRAME, PAGE_SIZE};

/// A physical memory address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysAddr(pub usize);

/// A user virtual address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtAddr(pub usize);

/// An index into the global frame pool. Descriptors track their backing
/// memory as frame numbers, not raw addresses; the allocator is the only
/// place that converts between the two.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNumber(pub usize);

impl PhysAddr {
    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }
}

impl VirtAddr {
    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }

    /// The base of the page containing this address.
    pub const fn page_floor(self) -> VirtAddr {
        VirtAddr(self.0 & PAGE_FRAME)
    }

    /// The byte offset of this address within its page.
    pub const fn page_offset(self) -> usize {
        self.0 & !PAGE_FRAME
    }
}

impl Debug for PhysAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PA:{:#x}", self.0)
    }
}

impl Debug for VirtAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "VA:{:#x}", self.0)
    }
}

impl Debug for FrameNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PF:{}", self.0)
    }
}
