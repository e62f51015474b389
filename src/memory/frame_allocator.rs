//! One allocator object for the whole kernel, with basic synchronization.
//!
//! The allocator starts in an early-boot mode that can only bump out pages
//! and never free them. [`FrameAllocator::bootstrap`] partitions whatever
//! raw memory is left into allocator metadata and the allocatable frame
//! pool, then re-seats the allocator over the bitmap implementation.

use alloc::boxed::Box;
use alloc::vec::Vec;
use log::info;
use spin::Mutex;

use super::addresses::{FrameNumber, PhysAddr};
use super::bitmap_frame_allocator::BitmapFrameAllocator;
use super::boot_frame_allocator::BootFrameAllocator;
use super::error::VmError;
use super::ram::Ram;
use crate::constants::memory::{PAGE_SIZE, RUN_SLOT_BYTES};

enum FrameAllocatorImpl {
    Boot(BootFrameAllocator),
    Bitmap(BitmapFrameAllocator),
}

pub struct FrameAllocator {
    inner: Mutex<FrameAllocatorImpl>,
}

impl FrameAllocator {
    pub fn new(ram: &Ram) -> Self {
        Self {
            inner: Mutex::new(FrameAllocatorImpl::Boot(BootFrameAllocator::new(
                ram.base(),
                ram.end(),
            ))),
        }
    }

    /// Carve the remaining raw range into metadata and the frame pool.
    ///
    /// Whole frames at the low end are reserved for the used bitmap and
    /// the top of the range is retracted by one 32-bit run-length slot per
    /// frame, so the pool holds `usable / (PAGE_SIZE + 4)` frames. There is
    /// no error path: not having enough memory to boot is a configuration
    /// problem, not something to recover from.
    pub fn bootstrap(&self) {
        let mut inner = self.inner.lock();
        let (raw_start, raw_end) = match &*inner {
            FrameAllocatorImpl::Boot(boot) => boot.remaining(),
            FrameAllocatorImpl::Bitmap(_) => panic!("vm: bootstrap called twice"),
        };

        let raw_frames = (raw_end.0 - raw_start.0) / PAGE_SIZE;
        let bitmap_frames = raw_frames.div_ceil(8).div_ceil(PAGE_SIZE);
        let pool_start = PhysAddr(raw_start.0 + bitmap_frames * PAGE_SIZE);

        // The run-length table occupies the top `4 * frame_max` bytes of
        // the range; each pool frame costs PAGE_SIZE + 4 bytes overall.
        let frame_max = (raw_end.0 - pool_start.0) / (PAGE_SIZE + RUN_SLOT_BYTES);

        info!("vm: {} frames available", frame_max);
        *inner = FrameAllocatorImpl::Bitmap(BitmapFrameAllocator::new(pool_start, frame_max));
    }

    fn with_bitmap<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut BitmapFrameAllocator) -> R,
    {
        match &mut *self.inner.lock() {
            FrameAllocatorImpl::Boot(_) => panic!("vm: frame pool used before bootstrap"),
            FrameAllocatorImpl::Bitmap(bitmap) => f(bitmap),
        }
    }

    /// Frames in the pool. Only meaningful after bootstrap.
    pub fn frame_max(&self) -> usize {
        self.with_bitmap(|bitmap| bitmap.frame_max())
    }

    pub fn addr_of(&self, frame: FrameNumber) -> PhysAddr {
        self.with_bitmap(|bitmap| bitmap.addr_of(frame))
    }

    pub fn alloc_frame(&self) -> Result<FrameNumber, VmError> {
        self.alloc_frames(1)
    }

    pub fn alloc_frames(&self, npages: usize) -> Result<FrameNumber, VmError> {
        self.with_bitmap(|bitmap| bitmap.alloc_frames(npages).ok_or(VmError::OutOfMemory))
    }

    pub fn free_frame(&self, frame: FrameNumber) {
        self.with_bitmap(|bitmap| bitmap.free_frames(frame));
    }

    /// Build a per-page frame array out of independent single-frame
    /// allocations. The pages need not be physically contiguous. On
    /// failure, every frame already obtained is freed before returning.
    pub fn alloc_page_frames(&self, npages: usize) -> Result<Box<[FrameNumber]>, VmError> {
        let mut frames = Vec::with_capacity(npages);
        for _ in 0..npages {
            match self.alloc_frame() {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    self.free_page_frames(&frames);
                    return Err(e);
                }
            }
        }
        Ok(frames.into_boxed_slice())
    }

    pub fn free_page_frames(&self, frames: &[FrameNumber]) {
        for &frame in frames {
            self.free_frame(frame);
        }
    }

    /// Kernel-space page allocation, usable before user processes exist.
    /// Before bootstrap this falls through to the one-way boot allocator.
    pub fn alloc_kernel_pages(&self, npages: usize) -> Result<PhysAddr, VmError> {
        match &mut *self.inner.lock() {
            FrameAllocatorImpl::Boot(boot) => boot.steal(npages).ok_or(VmError::OutOfMemory),
            FrameAllocatorImpl::Bitmap(bitmap) => {
                let frame = bitmap.alloc_frames(npages).ok_or(VmError::OutOfMemory)?;
                Ok(bitmap.addr_of(frame))
            }
        }
    }

    pub fn free_kernel_pages(&self, addr: PhysAddr) {
        match &mut *self.inner.lock() {
            FrameAllocatorImpl::Boot(_) => {
                panic!("vm: cannot free pages handed out before bootstrap")
            }
            FrameAllocatorImpl::Bitmap(bitmap) => {
                let frame = bitmap.frame_of(addr);
                bitmap.free_frames(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::memory::PAGE_SIZE;

    fn ram_and_allocator(pages: usize) -> (Ram, FrameAllocator) {
        let ram = Ram::new(PhysAddr(0), pages * PAGE_SIZE);
        let allocator = FrameAllocator::new(&ram);
        (ram, allocator)
    }

    #[test]
    fn bootstrap_partitions_raw_range() {
        // 256 raw frames: one reserved for the bitmap, the rest shrunk by
        // 4 bytes of run-length slot per frame.
        let (_ram, allocator) = ram_and_allocator(256);
        allocator.bootstrap();
        assert_eq!(allocator.frame_max(), 255 * PAGE_SIZE / (PAGE_SIZE + 4));
    }

    #[test]
    fn boot_mode_hands_out_pages_once() {
        let (_ram, allocator) = ram_and_allocator(256);
        let a = allocator.alloc_kernel_pages(2).unwrap();
        let b = allocator.alloc_kernel_pages(1).unwrap();
        assert_eq!(a, PhysAddr(0));
        assert_eq!(b, PhysAddr(2 * PAGE_SIZE));
    }

    #[test]
    #[should_panic(expected = "before bootstrap")]
    fn boot_mode_free_panics() {
        let (_ram, allocator) = ram_and_allocator(256);
        let addr = allocator.alloc_kernel_pages(1).unwrap();
        allocator.free_kernel_pages(addr);
    }

    #[test]
    fn pool_excludes_boot_allocations() {
        let (_ram, allocator) = ram_and_allocator(256);
        let stolen = allocator.alloc_kernel_pages(4).unwrap();
        allocator.bootstrap();
        let first = allocator.alloc_kernel_pages(1).unwrap();
        // Frame 0..4 were stolen, frame 4 holds the bitmap.
        assert!(first.0 >= stolen.0 + 5 * PAGE_SIZE);
    }

    #[test]
    fn kernel_pages_roundtrip_after_bootstrap() {
        let (_ram, allocator) = ram_and_allocator(64);
        allocator.bootstrap();
        let a = allocator.alloc_kernel_pages(3).unwrap();
        assert!(a.is_page_aligned());
        allocator.free_kernel_pages(a);
        let b = allocator.alloc_kernel_pages(3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn partial_multi_frame_allocation_unwinds() {
        let (_ram, allocator) = ram_and_allocator(64);
        allocator.bootstrap();
        let total = allocator.frame_max();

        assert_eq!(
            allocator.alloc_page_frames(total + 1).unwrap_err(),
            VmError::OutOfMemory
        );
        // Nothing may be left behind by the failed attempt.
        let all = allocator.alloc_page_frames(total).unwrap();
        assert_eq!(all.len(), total);
    }
}
