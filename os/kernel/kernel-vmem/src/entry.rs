use bitfield_struct::bitfield;
use kernel_memory_addresses::FrameNumber;

/// A single 32-bit page directory or page table entry (x86, no PAE).
///
/// Directory entries and second-level entries share this layout. A directory
/// entry points to a second-level table; a second-level entry maps one 4 KiB
/// page.
///
/// ### Bit layout
///
/// | Bits  | Name / Mnemonic | Meaning |
/// |-------|-----------------|---------|
/// | 0     | `P`             | Present |
/// | 1     | `RW`            | Writable |
/// | 2     | `US`            | User-mode accessible |
/// | 3     | `PWT`           | Write-through caching |
/// | 4     | `PCD`           | Disable caching |
/// | 5     | `A`             | Accessed |
/// | 6     | `D`             | Dirty (second level only) |
/// | 7     | `PS`            | 4 MiB page (directory only; always 0 here) |
/// | 8     | `G`             | Global (second level only) |
/// | 9–11  | OS avail        | Ignored by hardware |
/// | 12–31 | `frame`         | Physical frame number |
///
/// ### Example
/// ```rust
/// # use kernel_vmem::PageEntryBits;
/// # use kernel_memory_addresses::FrameNumber;
/// let e = PageEntryBits::leaf(FrameNumber::new(0x123));
/// assert!(e.present() && e.writable());
/// assert_eq!(e.into_bits(), 0x0012_3003);
/// assert_eq!(PageEntryBits::reserved().into_bits(), 2);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write through a leaf.
    pub dirty: bool,

    /// Page Size (PS, bit 7). Never set: only 4 KiB pages are used.
    pub page_size: bool,

    /// Global (G, bit 8).
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame number (bits 12..=31).
    #[bits(20)]
    frame_bits: u32,
}

impl PageEntryBits {
    /// Present, writable, supervisor-only directory entry for the
    /// second-level table in `frame`.
    #[inline]
    #[must_use]
    pub const fn table(frame: FrameNumber) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_frame_bits(frame.as_u32())
    }

    /// Present, writable, supervisor-only mapping of the 4 KiB page in `frame`.
    #[inline]
    #[must_use]
    pub const fn leaf(frame: FrameNumber) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_frame_bits(frame.as_u32())
    }

    /// Writable but not present: the state of every entry that has no
    /// backing yet.
    #[inline]
    #[must_use]
    pub const fn reserved() -> Self {
        Self::new().with_writable(true)
    }

    /// The frame this entry points to. Meaningless when not present.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> FrameNumber {
        FrameNumber::new(self.frame_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_and_leaf_encode_frame_and_flags() {
        let t = PageEntryBits::table(FrameNumber::new(0x400));
        assert_eq!(t.into_bits(), 0x0040_0003);
        assert_eq!(t.frame(), FrameNumber::new(0x400));
        assert!(!t.user_access());
        assert!(!t.page_size());

        let l = PageEntryBits::leaf(FrameNumber::new(0xFFFFF));
        assert_eq!(l.into_bits(), 0xFFFF_F003);
    }

    #[test]
    fn clearing_present_keeps_frame_and_flags() {
        let e = PageEntryBits::leaf(FrameNumber::new(77)).with_dirty(true);
        let cleared = e.with_present(false);
        assert_eq!(cleared.frame(), FrameNumber::new(77));
        assert!(cleared.writable());
        assert!(cleared.dirty());
        assert_eq!(cleared.into_bits(), e.into_bits() & !1);
    }
}
