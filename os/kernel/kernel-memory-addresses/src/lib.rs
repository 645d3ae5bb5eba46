//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw 32-bit addresses, physical frame numbers
//! and virtual page bases used by the frame pools and the two-level paging
//! code.
//!
//! ## Overview
//!
//! The types prevent mixing virtual and physical addresses (and frame numbers
//! with byte addresses) at compile time while remaining zero-cost wrappers
//! around `u32` values.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address on the physical bus. |
//! | [`FrameNumber`] | Index of a 4 KiB physical frame (`address >> 12`). |
//! | [`VirtualAddress`] | A byte address in a (possibly translated) address space. |
//! | [`VirtualPage`] | The 4 KiB-aligned base of a virtual page. |
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x4000_1234);
//! let page = va.page();
//! assert_eq!(page.base().as_u32(), 0x4000_1000);
//! assert_eq!(va.page_offset(), 0x234);
//!
//! let frame = FrameNumber::new(0x200);
//! assert_eq!(frame.base().as_u32(), 0x0020_0000);
//! assert_eq!(PhysicalAddress::new(0x0020_0fff).frame(), frame);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`
//!   and `Hash`.
//! - All conversions are `const fn`. Arithmetic that could leave the 32-bit
//!   address space is offered in a checked form.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod frame_number;
mod physical_address;
mod virtual_address;
mod virtual_page;

pub use frame_number::FrameNumber;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Size of a page (and of a physical frame) in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// log2 of [`PAGE_SIZE`], i.e. the number of in-page offset bits.
pub const PAGE_SHIFT: u32 = 12;

const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE);

/// Number of pages needed to hold `bytes` bytes (rounds up).
///
/// ```rust
/// # use kernel_memory_addresses::pages_for;
/// assert_eq!(pages_for(0), 0);
/// assert_eq!(pages_for(1), 1);
/// assert_eq!(pages_for(4096), 1);
/// assert_eq!(pages_for(4097), 2);
/// ```
#[inline]
#[must_use]
pub const fn pages_for(bytes: u32) -> u32 {
    bytes.div_ceil(PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_round_up() {
        assert_eq!(pages_for(u32::MAX), 1 << 20);
        assert_eq!(pages_for(3 * PAGE_SIZE), 3);
        assert_eq!(pages_for(3 * PAGE_SIZE - 1), 3);
    }

    #[test]
    fn frame_and_address_agree() {
        let pa = PhysicalAddress::new(0x0040_2abc);
        assert_eq!(pa.frame().as_u32(), 0x402);
        assert_eq!(pa.frame().base().as_u32(), 0x0040_2000);
    }

    #[test]
    fn virtual_page_offsets() {
        let va = VirtualAddress::new(0xFFC0_3004);
        let page = VirtualPage::containing_address(va);
        assert_eq!(page.base(), VirtualAddress::new(0xFFC0_3000));
        assert_eq!(page.number(), 0xFFC03);
        assert_eq!(page.checked_add(1), Some(VirtualPage::from_number(0xFFC04)));
        assert_eq!(VirtualPage::from_number(0xFFFFF).checked_add(1), None);
    }
}
