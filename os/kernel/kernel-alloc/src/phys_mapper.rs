//! # Physical Memory Access
//!
//! Frame pools and page tables live in physical frames. Code can only touch
//! them through a virtual address, and how a physical address becomes
//! addressable differs between environments:
//!
//! - **Kernel before paging / shared region**: low physical memory is
//!   identity-mapped, so the physical address *is* the pointer
//!   ([`IdentityPhysMapper`]).
//! - **Host tests**: physical memory is a heap buffer
//!   ([`SimulatedRam`](crate::sim::SimulatedRam)).
//!
//! [`PhysMapper`] abstracts over these.

use kernel_memory_addresses::PhysicalAddress;

/// Converts physical addresses to usable references in the current address
/// space.
///
/// # Safety
/// - `pa` must be mapped writable in the current address space for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// `pa` must be mapped, suitably aligned for `T`, and not aliased by any
    /// other live reference for `'a`.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Convert the physical byte range `pa .. pa + len` to a mutable slice.
    ///
    /// # Safety
    /// The whole range must be mapped and not aliased for `'a`.
    unsafe fn phys_bytes_mut<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8];
}

/// [`PhysMapper`] for identity-mapped physical memory.
///
/// Valid while paging is off, and afterwards for everything inside the
/// shared identity-mapped region at the bottom of each address space.
#[derive(Debug, Default, Copy, Clone)]
pub struct IdentityPhysMapper;

impl PhysMapper for IdentityPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = core::ptr::with_exposed_provenance_mut::<T>(pa.as_usize());
        // SAFETY: Caller guarantees the physical address is identity-mapped and unaliased.
        unsafe { &mut *ptr }
    }

    unsafe fn phys_bytes_mut<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8] {
        let ptr = core::ptr::with_exposed_provenance_mut::<u8>(pa.as_usize());
        // SAFETY: Caller guarantees the range is identity-mapped and unaliased.
        unsafe { core::slice::from_raw_parts_mut(ptr, len) }
    }
}
