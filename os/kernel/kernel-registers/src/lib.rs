//! # Typed 32-bit x86 Paging Registers
//!
//! Bit layouts of the control registers involved in two-level paging:
//!
//! - [`Cr0`](cr0::Cr0): the paging enable bit (`PG`).
//! - [`Cr2`](cr2::Cr2): the linear address of the last page fault.
//! - [`Cr3`](cr3::Cr3): the physical base of the active page directory.
//!
//! The layouts are always available so they can be built and inspected on
//! the host. Reading and writing the real registers needs the `asm` feature
//! and a 32-bit x86 target.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(any(test, feature = "cr0"))]
pub mod cr0;

#[cfg(any(test, feature = "cr2"))]
pub mod cr2;

#[cfg(any(test, feature = "cr3"))]
pub mod cr3;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}

/// Drop the translation of the page containing `va` from the TLB.
///
/// # Safety
/// Privileged instruction; must run in ring 0.
#[cfg(all(feature = "asm", target_arch = "x86"))]
#[inline]
pub unsafe fn invlpg(va: kernel_memory_addresses::VirtualAddress) {
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u32(), options(nostack, preserves_flags));
    }
}
