//! TLB miss resolution.
//!
//! The trap entry path calls [`Vm::resolve_fault`] on every translation
//! cache miss. The resolver classifies the fault, finds the region of the
//! current address space containing the faulting page, looks up the
//! pre-assigned backing frame, and programs a cache slot.

use log::debug;

use super::address_space::AddressSpace;
use super::addresses::VirtAddr;
use super::error::VmError;
use super::Vm;

/// Fault classification delivered by the exception entry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Read through a missing translation.
    Read,
    /// Write through a missing translation.
    Write,
    /// Write through a valid but read-only translation.
    ReadOnly,
}

impl FaultKind {
    /// Decode the raw trap code. Unknown codes are a malformed request,
    /// not a resolvable fault.
    pub fn from_code(code: usize) -> Result<Self, VmError> {
        match code {
            0 => Ok(FaultKind::Read),
            1 => Ok(FaultKind::Write),
            2 => Ok(FaultKind::ReadOnly),
            _ => Err(VmError::InvalidRequest),
        }
    }
}

impl Vm {
    /// Resolve a translation cache miss at `vaddr` against the current
    /// address space.
    ///
    /// Write permission: segment 0 is read-only once loaded, segment 1 and
    /// the stack are writable, and every region is writable while the
    /// address space is still initializing. A resolved fault always leaves
    /// a valid cache entry.
    ///
    /// # Panics
    ///
    /// With no current address space: that is a kernel fault early in
    /// boot, and dying here beats an infinite fault loop.
    pub fn resolve_fault(
        &self,
        aspace: Option<&AddressSpace>,
        kind: FaultKind,
        vaddr: VirtAddr,
    ) -> Result<(), VmError> {
        let vpage = vaddr.page_floor();
        debug!("vm: fault: {:?}", vpage);

        match kind {
            // No read-only mappings are handed out in steady state, so a
            // modify fault means a write where writes are forbidden.
            FaultKind::ReadOnly => return Err(VmError::AccessViolation),
            FaultKind::Read | FaultKind::Write => {}
        }

        let aspace = match aspace {
            Some(aspace) => aspace,
            None => panic!("vm: fault at {:?} with no current address space", vpage),
        };
        aspace.assert_valid();

        let (frame, writable) = aspace.translate(vpage).ok_or(VmError::AccessViolation)?;
        let writable = writable || aspace.initializing;
        let pframe = self.frames.addr_of(frame);

        debug!("vm: {:?} -> {:?}", vpage, pframe);
        self.tlb.insert(vpage, pframe, writable);
        Ok(())
    }
}
