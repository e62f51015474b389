//! The physical memory region managed by the subsystem.
//!
//! Owns the bytes of `[base, base + size)` and hands out frame-granular
//! zero/copy/read/write operations. The loader and fork paths go through
//! this instead of raw pointers, so page contents stay reachable from host
//! tests.

use alloc::boxed::Box;
use alloc::vec;
use spin::Mutex;

use super::addresses::PhysAddr;
use crate::constants::memory::PAGE_SIZE;

pub struct Ram {
    base: PhysAddr,
    size: usize,
    bytes: Mutex<Box<[u8]>>,
}

impl Ram {
    pub fn new(base: PhysAddr, size: usize) -> Self {
        assert!(base.is_page_aligned());
        assert!(size > 0 && size % PAGE_SIZE == 0);
        Self {
            base,
            size,
            bytes: Mutex::new(vec![0u8; size].into_boxed_slice()),
        }
    }

    pub fn base(&self) -> PhysAddr {
        self.base
    }

    /// First address past the managed range.
    pub fn end(&self) -> PhysAddr {
        PhysAddr(self.base.0 + self.size)
    }

    fn offset_of(&self, addr: PhysAddr, len: usize) -> usize {
        assert!(addr >= self.base, "address below physical memory: {:?}", addr);
        let offset = addr.0 - self.base.0;
        assert!(offset + len <= self.size, "address past physical memory: {:?}", addr);
        offset
    }

    pub fn zero_frame(&self, frame: PhysAddr) {
        assert!(frame.is_page_aligned());
        let offset = self.offset_of(frame, PAGE_SIZE);
        let mut bytes = self.bytes.lock();
        bytes[offset..offset + PAGE_SIZE].fill(0);
    }

    /// Copy one whole frame. Source and destination must not be the same
    /// frame; every frame has exactly one owner, so they never are.
    pub fn copy_frame(&self, dst: PhysAddr, src: PhysAddr) {
        assert!(dst.is_page_aligned() && src.is_page_aligned());
        assert!(dst != src);
        let src_offset = self.offset_of(src, PAGE_SIZE);
        let dst_offset = self.offset_of(dst, PAGE_SIZE);
        let mut bytes = self.bytes.lock();
        bytes.copy_within(src_offset..src_offset + PAGE_SIZE, dst_offset);
    }

    pub fn write(&self, addr: PhysAddr, data: &[u8]) {
        let offset = self.offset_of(addr, data.len());
        let mut bytes = self.bytes.lock();
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn read(&self, addr: PhysAddr, buf: &mut [u8]) {
        let offset = self.offset_of(addr, buf.len());
        let bytes = self.bytes.lock();
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
    }
}
