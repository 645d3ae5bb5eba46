//! # Page Faults
//!
//! [`PageFault`] is what the trap entry hands to
//! [`PageTable::handle_fault`](crate::PageTable::handle_fault): the faulting
//! address (from CR2) and the error code the CPU pushed.

use bitfield_struct::bitfield;
use kernel_memory_addresses::VirtualAddress;

/// The error code pushed by the CPU for a page fault (`#PF`).
///
/// ### Bit layout
///
/// | Bit | Name | Set when |
/// |-----|------|----------|
/// | 0   | `P`    | The page was present (protection violation) |
/// | 1   | `W/R`  | The access was a write |
/// | 2   | `U/S`  | The access came from user mode |
/// | 3   | `RSVD` | A reserved bit was set in a paging entry |
/// | 4   | `I/D`  | The access was an instruction fetch |
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    pub present: bool,
    pub write: bool,
    pub user: bool,
    pub reserved_bit: bool,
    pub instruction_fetch: bool,
    #[bits(27)]
    __: u32,
}

impl PageFaultError {
    /// Whether the fault hit a present page, i.e. a protection violation
    /// rather than a missing translation.
    #[inline]
    #[must_use]
    pub const fn is_protection_violation(self) -> bool {
        self.present()
    }

    /// Short human-readable description of the access.
    #[must_use]
    pub const fn explain(self) -> &'static str {
        match (self.present(), self.write(), self.user()) {
            (false, false, false) => "supervisor read of a non-present page",
            (false, true, false) => "supervisor write to a non-present page",
            (false, false, true) => "user read of a non-present page",
            (false, true, true) => "user write to a non-present page",
            (true, false, false) => "supervisor read protection violation",
            (true, true, false) => "supervisor write protection violation",
            (true, false, true) => "user read protection violation",
            (true, true, true) => "user write protection violation",
        }
    }
}

/// A page fault as seen by the handler.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PageFault {
    pub address: VirtualAddress,
    pub error: PageFaultError,
}

impl PageFault {
    #[inline]
    #[must_use]
    pub const fn new(address: VirtualAddress, error_code: u32) -> Self {
        Self {
            address,
            error: PageFaultError::from_bits(error_code),
        }
    }
}

/// A page fault that could not be resolved.
///
/// The embedder decides what to do with the faulting context.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FaultError {
    #[error("protection violation at {0}")]
    ProtectionViolation(VirtualAddress),
    #[error("no virtual memory pool owns {0}")]
    NoOwningRegion(VirtualAddress),
    #[error("no free frame to back {0}")]
    OutOfFrames(VirtualAddress),
    #[error("the faulting page table is not loaded")]
    NotCurrent,
}
