//! Per-process address space descriptors and their lifecycle.
//!
//! A descriptor holds up to two statically placed loadable segments plus a
//! fixed-size user stack directly below the top of user space. Each region
//! is backed by one physical frame per page; the frames are owned
//! exclusively by the descriptor and need not be physically contiguous.
//!
//! Lifecycle: `new` -> `define_region`* -> `prepare_load` (allocate and
//! zero backing frames, enter the initializing window) -> `complete_load`
//! -> `destroy`. `copy` deep-copies a loaded descriptor for fork; frames
//! are never shared between address spaces.

use alloc::boxed::Box;
use arrayvec::ArrayVec;
use bitflags::bitflags;
use log::warn;

use super::addresses::{FrameNumber, VirtAddr};
use super::error::VmError;
use super::Vm;
use crate::constants::memory::{MAX_SEGMENTS, PAGE_SIZE, STACK_PAGES, USER_STACK_TOP};

bitflags! {
    /// Permission bits accepted by [`AddressSpace::define_region`]. They are
    /// recorded but not enforced beyond the read-only/writable split the
    /// fault path applies: segment 0 is read-only once loaded, everything
    /// else is writable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionPerms: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

#[derive(Debug)]
pub(super) struct Segment {
    pub(super) vbase: VirtAddr,
    pub(super) npages: usize,
    #[allow(dead_code)]
    pub(super) perms: RegionPerms,
    /// One frame per page, allocated by `prepare_load`; `None` until then.
    pub(super) frames: Option<Box<[FrameNumber]>>,
}

#[derive(Debug)]
pub struct AddressSpace {
    pub(super) segments: ArrayVec<Segment, MAX_SEGMENTS>,
    pub(super) stack_frames: Option<Box<[FrameNumber]>>,
    /// Set between `prepare_load` and `complete_load`; while it holds, the
    /// fault path grants writes everywhere so the loader can populate
    /// pages.
    pub(super) initializing: bool,
}

impl AddressSpace {
    /// An empty descriptor: no regions, no backing frames.
    pub fn new() -> Self {
        Self {
            segments: ArrayVec::new(),
            stack_frames: None,
            initializing: false,
        }
    }

    /// Record a loadable segment. The base is aligned down with its
    /// sub-page offset absorbed into the length, and the length rounded up
    /// to whole pages. At most two segments are supported.
    pub fn define_region(
        &mut self,
        vaddr: VirtAddr,
        size: usize,
        perms: RegionPerms,
    ) -> Result<(), VmError> {
        let size = size + vaddr.page_offset();
        let vbase = vaddr.page_floor();
        let npages = size.div_ceil(PAGE_SIZE);

        if self.segments.is_full() {
            warn!("vm: too many regions, rejecting region at {:?}", vbase);
            return Err(VmError::TooManyRegions);
        }
        self.segments.push(Segment {
            vbase,
            npages,
            perms,
            frames: None,
        });
        Ok(())
    }

    /// The initial user stack pointer. The stack must already be backed.
    pub fn define_stack(&self) -> VirtAddr {
        assert!(self.stack_frames.is_some(), "stack has no backing frames");
        VirtAddr(USER_STACK_TOP)
    }

    /// Allocate and zero one frame per page for every segment and the
    /// stack, then enter the initializing window. On allocation failure
    /// everything already obtained for this descriptor is freed and the
    /// descriptor is left unbacked, exactly as before the call.
    pub fn prepare_load(&mut self, vm: &Vm) -> Result<(), VmError> {
        assert!(self.segments.iter().all(|s| s.frames.is_none()));
        assert!(self.stack_frames.is_none());

        for i in 0..self.segments.len() {
            match vm.frames.alloc_page_frames(self.segments[i].npages) {
                Ok(frames) => self.segments[i].frames = Some(frames),
                Err(e) => {
                    self.release_frames(vm);
                    return Err(e);
                }
            }
        }
        match vm.frames.alloc_page_frames(STACK_PAGES) {
            Ok(frames) => self.stack_frames = Some(frames),
            Err(e) => {
                self.release_frames(vm);
                return Err(e);
            }
        }

        self.zero_regions(vm);
        self.initializing = true;
        Ok(())
    }

    /// Leave the initializing window; from here on segment 0 is read-only.
    pub fn complete_load(&mut self) {
        self.initializing = false;
    }

    /// Deep copy for fork: same region geometry, freshly allocated frames,
    /// byte-identical page contents. The source is never mutated and the
    /// copy's frames are disjoint from the source's.
    pub fn copy(&self, vm: &Vm) -> Result<AddressSpace, VmError> {
        let mut new = AddressSpace::new();
        for seg in &self.segments {
            new.segments.push(Segment {
                vbase: seg.vbase,
                npages: seg.npages,
                perms: seg.perms,
                frames: None,
            });
        }

        // Reuse prepare_load rather than duplicating the allocation logic.
        if let Err(e) = new.prepare_load(vm) {
            new.destroy(vm);
            return Err(e);
        }

        for (old_seg, new_seg) in self.segments.iter().zip(new.segments.iter()) {
            let old_frames = old_seg.frames.as_ref().expect("source segment not loaded");
            let new_frames = new_seg.frames.as_ref().expect("copy segment not backed");
            for (&src, &dst) in old_frames.iter().zip(new_frames.iter()) {
                vm.ram.copy_frame(vm.frames.addr_of(dst), vm.frames.addr_of(src));
            }
        }
        let old_stack = self.stack_frames.as_ref().expect("source stack not loaded");
        let new_stack = new.stack_frames.as_ref().expect("copy stack not backed");
        for (&src, &dst) in old_stack.iter().zip(new_stack.iter()) {
            vm.ram.copy_frame(vm.frames.addr_of(dst), vm.frames.addr_of(src));
        }

        new.complete_load();
        Ok(new)
    }

    /// Free every owned frame and consume the descriptor. Safe on a
    /// descriptor that was never prepared: only arrays that exist are
    /// freed.
    pub fn destroy(mut self, vm: &Vm) {
        self.release_frames(vm);
    }

    /// Activating an address space flushes the whole translation cache;
    /// there is no selective invalidation.
    pub fn activate(&self, vm: &Vm) {
        vm.tlb.invalidate_all();
    }

    pub fn deactivate(&self, vm: &Vm) {
        vm.tlb.invalidate_all();
    }

    fn release_frames(&mut self, vm: &Vm) {
        for seg in self.segments.iter_mut() {
            if let Some(frames) = seg.frames.take() {
                vm.frames.free_page_frames(&frames);
            }
        }
        if let Some(frames) = self.stack_frames.take() {
            vm.frames.free_page_frames(&frames);
        }
    }

    fn zero_regions(&self, vm: &Vm) {
        for seg in &self.segments {
            if let Some(frames) = &seg.frames {
                for &frame in frames.iter() {
                    vm.ram.zero_frame(vm.frames.addr_of(frame));
                }
            }
        }
        if let Some(frames) = &self.stack_frames {
            for &frame in frames.iter() {
                vm.ram.zero_frame(vm.frames.addr_of(frame));
            }
        }
    }

    /// Fault-path invariant checks: a descriptor taking faults must have
    /// page-aligned bases and backing frames for every defined region.
    /// Violations are corrupted kernel state, not user errors.
    pub(super) fn assert_valid(&self) {
        for seg in &self.segments {
            assert!(seg.vbase.is_page_aligned());
            assert!(seg.npages != 0);
            assert!(seg.frames.is_some());
        }
        assert!(self.stack_frames.is_some());
    }

    /// Find the frame backing `vpage` and whether the region is writable in
    /// steady state. Direct index into the per-page frame array, never a
    /// scan. `None` for addresses outside every region.
    pub(super) fn translate(&self, vpage: VirtAddr) -> Option<(FrameNumber, bool)> {
        debug_assert!(vpage.is_page_aligned());
        for (index, seg) in self.segments.iter().enumerate() {
            let vtop = seg.vbase.0 + seg.npages * PAGE_SIZE;
            if (seg.vbase.0..vtop).contains(&vpage.0) {
                let frames = seg.frames.as_ref().expect("faulting segment not backed");
                let page = (vpage.0 - seg.vbase.0) / PAGE_SIZE;
                // Segment 0 holds program text: read-only once loaded.
                return Some((frames[page], index != 0));
            }
        }

        let stack_base = USER_STACK_TOP - STACK_PAGES * PAGE_SIZE;
        if (stack_base..USER_STACK_TOP).contains(&vpage.0) {
            let frames = self.stack_frames.as_ref().expect("stack not backed");
            let page = (vpage.0 - stack_base) / PAGE_SIZE;
            return Some((frames[page], true));
        }
        None
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}
