pub mod address_space;
pub mod addresses;
pub mod bitmap_frame_allocator;
pub mod boot_frame_allocator;
pub mod error;
pub mod fault;
pub mod frame_allocator;
pub mod ram;
pub mod tlb;

pub use address_space::{AddressSpace, RegionPerms};
pub use addresses::{FrameNumber, PhysAddr, VirtAddr};
pub use error::VmError;
pub use fault::FaultKind;
pub use frame_allocator::FrameAllocator;
pub use ram::Ram;
pub use tlb::Tlb;

/// The memory subsystem: physical memory, the frame allocator, and the
/// translation cache, constructed once at boot and injected into every
/// consumer. Lives for the lifetime of the kernel.
pub struct Vm {
    pub ram: Ram,
    pub frames: FrameAllocator,
    pub tlb: Tlb,
}

impl Vm {
    /// Bring the subsystem up over physical memory `[base, base + size)`.
    /// The allocator starts in its one-way early-boot mode.
    pub fn new(base: PhysAddr, size: usize) -> Self {
        let ram = Ram::new(base, size);
        let frames = FrameAllocator::new(&ram);
        Self {
            ram,
            frames,
            tlb: Tlb::new(),
        }
    }

    /// Hand the remaining raw memory over to the bitmap allocator. Call
    /// once, after early-boot allocations are done.
    pub fn bootstrap(&self) {
        self.frames.bootstrap();
    }
}
