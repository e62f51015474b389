//! The translation cache: a small fixed table of (virtual page, physical
//! frame) slots, treated as fully associative with random replacement.
//!
//! The slot array sits behind a mutex that stands in for the
//! interrupts-disabled critical section of the single-core original; the
//! scan-for-invalid-then-write sequence must look atomic to preemption.
//! Cross-core invalidation is deliberately unsupported.

use bitflags::bitflags;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use spin::Mutex;

use super::addresses::{PhysAddr, VirtAddr};
use crate::constants::memory::NUM_TLB;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u8 {
        const VALID = 1 << 0;
        /// Hardware "dirty" bit; in this design it simply means writable.
        const DIRTY = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy)]
struct TlbEntry {
    vpage: VirtAddr,
    pframe: PhysAddr,
    flags: EntryFlags,
}

impl TlbEntry {
    const fn invalid() -> Self {
        Self {
            vpage: VirtAddr(0),
            pframe: PhysAddr(0),
            flags: EntryFlags::empty(),
        }
    }
}

struct TlbInner {
    slots: [TlbEntry; NUM_TLB],
    rng: SmallRng,
}

pub struct Tlb {
    inner: Mutex<TlbInner>,
}

impl Tlb {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TlbInner {
                slots: [TlbEntry::invalid(); NUM_TLB],
                rng: SmallRng::seed_from_u64(0x7b1e),
            }),
        }
    }

    /// Program a slot with `vpage -> pframe`. Reuses an invalid slot when
    /// one exists; otherwise overwrites a randomly chosen slot rather than
    /// failing. The inserted entry is always valid.
    pub fn insert(&self, vpage: VirtAddr, pframe: PhysAddr, writable: bool) {
        assert!(vpage.is_page_aligned());
        assert!(pframe.is_page_aligned());
        let mut flags = EntryFlags::VALID;
        if writable {
            flags |= EntryFlags::DIRTY;
        }
        let entry = TlbEntry { vpage, pframe, flags };

        let mut inner = self.inner.lock();
        let slot = inner
            .slots
            .iter()
            .position(|e| !e.flags.contains(EntryFlags::VALID));
        match slot {
            Some(slot) => inner.slots[slot] = entry,
            None => {
                let slot = inner.rng.gen_range(0..NUM_TLB);
                inner.slots[slot] = entry;
            }
        }
    }

    /// Mark every slot invalid. Done on each address-space switch; there is
    /// no selective invalidation.
    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock();
        for entry in inner.slots.iter_mut() {
            *entry = TlbEntry::invalid();
        }
    }

    /// Look up the mapping covering `vaddr`: the backing frame and whether
    /// the entry allows writes.
    pub fn probe(&self, vaddr: VirtAddr) -> Option<(PhysAddr, bool)> {
        let vpage = vaddr.page_floor();
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .find(|e| e.flags.contains(EntryFlags::VALID) && e.vpage == vpage)
            .map(|e| (e.pframe, e.flags.contains(EntryFlags::DIRTY)))
    }

    /// This design is single-core; nobody may ask us to shoot down another
    /// core's translations.
    pub fn shootdown(&self, _vpage: VirtAddr) -> ! {
        panic!("vm: tried to do tlb shootdown?!");
    }

    pub fn shootdown_all(&self) -> ! {
        panic!("vm: tried to do tlb shootdown?!");
    }
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::memory::PAGE_SIZE;

    fn valid_slots(tlb: &Tlb) -> usize {
        let inner = tlb.inner.lock();
        inner
            .slots
            .iter()
            .filter(|e| e.flags.contains(EntryFlags::VALID))
            .count()
    }

    #[test]
    fn insert_and_probe() {
        let tlb = Tlb::new();
        tlb.insert(VirtAddr(0x400000), PhysAddr(0x9000), false);
        assert_eq!(tlb.probe(VirtAddr(0x400123)), Some((PhysAddr(0x9000), false)));
        assert_eq!(tlb.probe(VirtAddr(0x401000)), None);
    }

    #[test]
    fn probe_reports_writable_bit() {
        let tlb = Tlb::new();
        tlb.insert(VirtAddr(0x400000), PhysAddr(0x9000), true);
        assert_eq!(tlb.probe(VirtAddr(0x400000)), Some((PhysAddr(0x9000), true)));
    }

    #[test]
    fn full_cache_overwrites_instead_of_failing() {
        let tlb = Tlb::new();
        for page in 0..NUM_TLB {
            tlb.insert(
                VirtAddr(0x400000 + page * PAGE_SIZE),
                PhysAddr(page * PAGE_SIZE),
                false,
            );
        }
        assert_eq!(valid_slots(&tlb), NUM_TLB);

        tlb.insert(VirtAddr(0x700000), PhysAddr(0x9000), true);
        // One victim was replaced; the new mapping is present and valid.
        assert_eq!(valid_slots(&tlb), NUM_TLB);
        assert_eq!(tlb.probe(VirtAddr(0x700000)), Some((PhysAddr(0x9000), true)));
    }

    #[test]
    fn invalidate_all_clears_every_slot() {
        let tlb = Tlb::new();
        tlb.insert(VirtAddr(0x400000), PhysAddr(0x9000), false);
        tlb.invalidate_all();
        assert_eq!(valid_slots(&tlb), 0);
        assert_eq!(tlb.probe(VirtAddr(0x400000)), None);
    }

    #[test]
    #[should_panic(expected = "shootdown")]
    fn shootdown_is_refused() {
        let tlb = Tlb::new();
        tlb.shootdown(VirtAddr(0x400000));
    }
}
