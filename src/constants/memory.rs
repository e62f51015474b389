pub const PAGE_SIZE: usize = 4096;
/// Mask selecting the page number bits of an address.
pub const PAGE_FRAME: usize = !(PAGE_SIZE - 1);

/// User processes always get 48k of stack.
pub const STACK_PAGES: usize = 12;
pub const USER_STACK_TOP: usize = 0x8000_0000;

/// A descriptor holds at most two loadable segments plus the stack.
pub const MAX_SEGMENTS: usize = 2;

pub const NUM_TLB: usize = 64;

pub const BITMAP_ENTRY_SIZE: usize = 64;
/// Bytes of run-length bookkeeping carried per frame in the pool.
pub const RUN_SLOT_BYTES: usize = 4;
