//! # Paging Hardware
//!
//! The few privileged operations the paging code needs, behind
//! [`PagingHardware`] so the tables can be built and tested on the host.
//! [`X86Paging`] drives the real control registers on 32-bit x86 with the
//! `asm` feature.

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress, VirtualPage};

/// Privileged paging operations of one CPU.
pub trait PagingHardware {
    /// Install `directory` as the translation root (CR3).
    ///
    /// # Safety
    /// `directory` must hold a valid page directory that maps the code and
    /// data in use, or paging must still be off.
    unsafe fn load_root(&mut self, directory: PhysicalAddress);

    /// Turn on paging (CR0.PG).
    ///
    /// # Safety
    /// A root must have been loaded that identity-maps the running code.
    unsafe fn enable(&mut self);

    /// Address of the most recent page fault (CR2).
    fn current_fault_address(&self) -> VirtualAddress;

    /// Error code of the most recent page fault.
    fn current_fault_flags(&self) -> u32;

    /// Drop any cached translation of `page`.
    fn invalidate_page(&mut self, page: VirtualPage);

    /// Access `va` through the MMU of the running address space.
    ///
    /// Only used once paging is on, for the self-map windows of the loaded
    /// directory.
    ///
    /// # Safety
    /// `va` must be mapped writable in the loaded directory, suitably
    /// aligned for `T`, and not aliased by any other live reference for `'a`.
    unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T;
}

/// [`PagingHardware`] for 32-bit x86.
///
/// The CPU pushes the fault error code on the stack rather than into a
/// register, so the trap entry stores it with
/// [`record_error_code`](Self::record_error_code) before dispatching.
#[cfg(all(feature = "asm", target_arch = "x86"))]
#[derive(Debug, Default)]
pub struct X86Paging {
    error_code: u32,
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl X86Paging {
    #[must_use]
    pub const fn new() -> Self {
        Self { error_code: 0 }
    }

    /// Remember the error code of the fault being serviced.
    pub const fn record_error_code(&mut self, code: u32) {
        self.error_code = code;
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl PagingHardware for X86Paging {
    unsafe fn load_root(&mut self, directory: PhysicalAddress) {
        use kernel_registers::StoreRegisterUnsafe;
        use kernel_registers::cr3::Cr3;

        let cr3 = Cr3::from_directory_phys(directory, false, false);
        // SAFETY: Forwarded from the caller.
        unsafe { cr3.store_unsafe() }
    }

    unsafe fn enable(&mut self) {
        use kernel_registers::cr0::Cr0;
        use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};

        // SAFETY: Forwarded from the caller.
        unsafe {
            let cr0 = Cr0::load_unsafe().with_pg_paging(true);
            cr0.store_unsafe();
        }
    }

    fn current_fault_address(&self) -> VirtualAddress {
        use kernel_registers::LoadRegisterUnsafe;
        use kernel_registers::cr2::Cr2;

        // SAFETY: Reading CR2 has no side effects in ring 0.
        unsafe { Cr2::load_unsafe() }.fault_address()
    }

    fn current_fault_flags(&self) -> u32 {
        self.error_code
    }

    fn invalidate_page(&mut self, page: VirtualPage) {
        // SAFETY: The kernel runs in ring 0.
        unsafe { kernel_registers::invlpg(page.base()) }
    }

    unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T {
        let ptr = core::ptr::with_exposed_provenance_mut::<T>(va.as_usize());
        // SAFETY: Caller guarantees the address is mapped and unaliased.
        unsafe { &mut *ptr }
    }
}
