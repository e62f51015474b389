//! The frame pool proper: a used bitmap plus a parallel run-length table.
//!
//! The bitmap answers "is this frame free", the run-length table answers
//! "how big is the allocation starting here", which is everything `free`
//! needs without a free-list that would itself want dynamic allocation.
//! A first-free cursor caches the lowest free frame so allocation does not
//! rescan from zero every time.

use alloc::boxed::Box;
use alloc::vec;

use super::addresses::{FrameNumber, PhysAddr};
use crate::constants::memory::{BITMAP_ENTRY_SIZE, PAGE_SIZE};

pub struct BitmapFrameAllocator {
    mem_start: PhysAddr,
    frame_max: usize,
    /// Lowest frame known to be free, or `frame_max` when the pool is
    /// exhausted. Never left pointing at a used frame.
    first_free: usize,
    used: Box<[u64]>,
    /// Length of the run starting at a frame; 0 for free frames and for
    /// every non-first frame of a run.
    run_length: Box<[u32]>,
}

impl BitmapFrameAllocator {
    pub fn new(mem_start: PhysAddr, frame_max: usize) -> Self {
        assert!(mem_start.is_page_aligned());
        let words = frame_max.div_ceil(BITMAP_ENTRY_SIZE);
        Self {
            mem_start,
            frame_max,
            first_free: 0,
            used: vec![0u64; words].into_boxed_slice(),
            run_length: vec![0u32; frame_max].into_boxed_slice(),
        }
    }

    pub fn frame_max(&self) -> usize {
        self.frame_max
    }

    pub fn addr_of(&self, frame: FrameNumber) -> PhysAddr {
        assert!(frame.0 < self.frame_max);
        PhysAddr(self.mem_start.0 + frame.0 * PAGE_SIZE)
    }

    /// Inverse of [`addr_of`](Self::addr_of). The address must be the
    /// frame-aligned base of a frame inside the pool.
    pub fn frame_of(&self, addr: PhysAddr) -> FrameNumber {
        assert!(addr >= self.mem_start, "address below frame pool: {:?}", addr);
        let offset = addr.0 - self.mem_start.0;
        assert!(offset % PAGE_SIZE == 0, "misaligned frame address: {:?}", addr);
        let frame = offset / PAGE_SIZE;
        assert!(frame < self.frame_max, "address past frame pool: {:?}", addr);
        FrameNumber(frame)
    }

    fn is_bit_set(&self, frame: usize) -> bool {
        assert!(frame < self.frame_max);
        let word = frame / BITMAP_ENTRY_SIZE;
        let mask = 1u64 << (frame % BITMAP_ENTRY_SIZE);
        (self.used[word] & mask) != 0
    }

    fn set_bit(&mut self, frame: usize) {
        assert!(frame < self.frame_max);
        let word = frame / BITMAP_ENTRY_SIZE;
        let mask = 1u64 << (frame % BITMAP_ENTRY_SIZE);
        self.used[word] |= mask;
    }

    fn clear_bit(&mut self, frame: usize) {
        assert!(frame < self.frame_max);
        let word = frame / BITMAP_ENTRY_SIZE;
        let mask = 1u64 << (frame % BITMAP_ENTRY_SIZE);
        self.used[word] &= !mask;
    }

    fn next_free_from(&self, start: usize) -> usize {
        (start..self.frame_max)
            .find(|&frame| !self.is_bit_set(frame))
            .unwrap_or(self.frame_max)
    }

    /// First-fit allocation of `npages` contiguous frames. Returns the first
    /// frame of the run, or `None` when no fit exists. All-or-nothing: no
    /// frame is marked used on failure.
    pub fn alloc_frames(&mut self, npages: usize) -> Option<FrameNumber> {
        assert!(npages >= 1);
        let mut frame = self.first_free;
        while frame + npages <= self.frame_max {
            if self.is_bit_set(frame) {
                frame += 1;
                continue;
            }
            // Check that the rest of the run is free too. On a collision,
            // resume just past the occupied frame instead of restarting.
            let mut resume = None;
            for i in 1..npages {
                if self.is_bit_set(frame + i) {
                    resume = Some(frame + i + 1);
                    break;
                }
            }
            if let Some(next) = resume {
                frame = next;
                continue;
            }
            for i in 0..npages {
                self.set_bit(frame + i);
                self.run_length[frame + i] = 0;
            }
            self.run_length[frame] = npages as u32;
            if frame == self.first_free {
                self.first_free = self.next_free_from(frame + npages);
            }
            return Some(FrameNumber(frame));
        }
        None
    }

    /// Free the run starting at `first`. Freeing anything other than the
    /// first frame of an allocated run is a corrupted-invariant panic, not a
    /// recoverable error.
    pub fn free_frames(&mut self, first: FrameNumber) {
        let frame = first.0;
        assert!(frame < self.frame_max);
        assert!(self.is_bit_set(frame), "freeing a free frame: {:?}", first);
        let npages = self.run_length[frame] as usize;
        assert!(npages > 0, "freeing the middle of a run: {:?}", first);
        for i in 0..npages {
            self.clear_bit(frame + i);
            self.run_length[frame + i] = 0;
        }
        if frame < self.first_free {
            self.first_free = frame;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(frames: usize) -> BitmapFrameAllocator {
        BitmapFrameAllocator::new(PhysAddr(0x100000), frames)
    }

    #[test]
    fn alloc_then_free_restores_state() {
        let mut alloc = pool(16);
        let _held = alloc.alloc_frames(3).unwrap();
        let used = alloc.used.clone();
        let runs = alloc.run_length.clone();
        let cursor = alloc.first_free;

        let run = alloc.alloc_frames(4).unwrap();
        alloc.free_frames(run);

        assert_eq!(alloc.used, used);
        assert_eq!(alloc.run_length, runs);
        assert_eq!(alloc.first_free, cursor);
    }

    #[test]
    fn sequential_allocations_do_not_overlap() {
        let mut alloc = pool(16);
        let a = alloc.alloc_frames(3).unwrap();
        let b = alloc.alloc_frames(5).unwrap();
        assert!(a.0 + 3 <= b.0 || b.0 + 5 <= a.0);
    }

    #[test]
    fn returned_addresses_are_frame_aligned() {
        let mut alloc = pool(16);
        let run = alloc.alloc_frames(2).unwrap();
        assert!(alloc.addr_of(run).is_page_aligned());
    }

    #[test]
    fn exhaust_free_then_reallocate_whole_pool() {
        let mut alloc = pool(16);
        let mut held = vec![];
        while let Some(frame) = alloc.alloc_frames(1) {
            held.push(frame);
        }
        assert_eq!(held.len(), 16);
        assert_eq!(alloc.first_free, 16);
        for frame in held {
            alloc.free_frames(frame);
        }
        assert_eq!(alloc.alloc_frames(16), Some(FrameNumber(0)));
    }

    #[test]
    fn first_fit_reuses_freed_space() {
        let mut alloc = pool(16);
        let a = alloc.alloc_frames(4).unwrap();
        let b = alloc.alloc_frames(4).unwrap();
        assert_eq!(a, FrameNumber(0));
        assert_eq!(b, FrameNumber(4));

        alloc.free_frames(a);
        assert_eq!(alloc.alloc_frames(2), Some(FrameNumber(0)));
        // Free frames are now 2, 3, and 8..16; the only 8-frame fit starts
        // at 8.
        assert_eq!(alloc.alloc_frames(8), Some(FrameNumber(8)));
        assert_eq!(alloc.alloc_frames(3), None);
    }

    #[test]
    fn scan_skips_past_blocking_frame() {
        let mut alloc = pool(16);
        let _a = alloc.alloc_frames(1).unwrap();
        let b = alloc.alloc_frames(1).unwrap();
        let _c = alloc.alloc_frames(1).unwrap();
        alloc.free_frames(b);
        assert_eq!(alloc.first_free, 1);

        // Frame 1 is free but frame 2 blocks a 2-frame run; the scan must
        // resume past frame 2, not restart.
        assert_eq!(alloc.alloc_frames(2), Some(FrameNumber(3)));
        // The cursor still points at the single free frame.
        assert_eq!(alloc.first_free, 1);
        assert_eq!(alloc.alloc_frames(1), Some(FrameNumber(1)));
    }

    #[test]
    fn cursor_moves_back_on_free_below_it() {
        let mut alloc = pool(8);
        let a = alloc.alloc_frames(2).unwrap();
        let _b = alloc.alloc_frames(2).unwrap();
        assert_eq!(alloc.first_free, 4);
        alloc.free_frames(a);
        assert_eq!(alloc.first_free, 0);
    }

    #[test]
    fn oversized_request_fails_without_side_effects() {
        let mut alloc = pool(8);
        assert_eq!(alloc.alloc_frames(9), None);
        assert_eq!(alloc.alloc_frames(8), Some(FrameNumber(0)));
    }

    #[test]
    #[should_panic(expected = "middle of a run")]
    fn freeing_mid_run_panics() {
        let mut alloc = pool(8);
        let run = alloc.alloc_frames(3).unwrap();
        alloc.free_frames(FrameNumber(run.0 + 1));
    }

    #[test]
    #[should_panic(expected = "freeing a free frame")]
    fn double_free_panics() {
        let mut alloc = pool(8);
        let run = alloc.alloc_frames(2).unwrap();
        alloc.free_frames(run);
        alloc.free_frames(run);
    }
}
