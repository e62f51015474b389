/// Failure conditions surfaced to callers of the memory subsystem.
///
/// Corrupted kernel invariants (misaligned descriptor state, freeing the
/// middle of a run, shootdown requests) are not represented here; those
/// panic, because no caller can meaningfully recover from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// The frame pool could not satisfy the request.
    OutOfMemory,
    /// A descriptor already holds its maximum number of loadable segments.
    TooManyRegions,
    /// A malformed request, e.g. an unknown fault code from the trap entry.
    InvalidRequest,
    /// A fault on an address outside every region, or a write through a
    /// read-only mapping. Normally fatal to the faulting thread.
    AccessViolation,
}

impl core::fmt::Display for VmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            VmError::OutOfMemory => write!(f, "Out of physical memory"),
            VmError::TooManyRegions => write!(f, "Too many regions"),
            VmError::InvalidRequest => write!(f, "Invalid request"),
            VmError::AccessViolation => write!(f, "Access violation"),
        }
    }
}
