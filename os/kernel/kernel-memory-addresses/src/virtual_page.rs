use crate::{PAGE_SHIFT, VirtualAddress};
use core::fmt;

/// Virtual memory page base.
///
/// A `VirtualPage` is the **page-aligned base** of a 4 KiB virtual page,
/// stored as its page number (`address >> 12`).
///
/// ### Invariants
/// - The low 12 bits of [`base`](Self::base) are always zero.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let vp = VirtualPage::containing_address(VirtualAddress::new(0x0040_1fff));
/// assert_eq!(vp.base().as_u32(), 0x0040_1000);
/// assert_eq!(vp.number(), 0x401);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(u32);

impl VirtualPage {
    /// Page that contains `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing_address(addr: VirtualAddress) -> Self {
        Self(addr.as_u32() >> PAGE_SHIFT)
    }

    /// Page with the given page number.
    ///
    /// ### Debug assertions
    /// - Asserts `n < 2^20` in debug builds.
    #[inline]
    #[must_use]
    pub const fn from_number(n: u32) -> Self {
        debug_assert!(n < (1 << 20));
        Self(n)
    }

    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.0 << PAGE_SHIFT)
    }

    /// The page `n` pages after this one, or `None` past the end of the
    /// 32-bit address space.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, n: u32) -> Option<Self> {
        match self.0.checked_add(n) {
            Some(v) if v < (1 << 20) => Some(Self(v)),
            _ => None,
        }
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage(0x{:08X})", self.base().as_u32())
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.base(), f)
    }
}
