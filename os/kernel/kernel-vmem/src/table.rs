//! # Two-Level Translation Tables
//!
//! - [`DirectoryIndex`]: index type for VA bits `[31:22]`.
//! - [`TableIndex`]: index type for VA bits `[21:12]`.
//! - [`PageDirectory`]: 1024 entries, one per 4 MiB of address space.
//! - [`SecondLevelTable`]: 1024 entries, one per 4 KiB page.
//!
//! Both tables are exactly one 4 KiB frame and share the entry layout of
//! [`PageEntryBits`]. The last directory entry ([`SELF_MAP_INDEX`]) points
//! at the directory itself, which makes the directory double as the
//! second-level table of the top 4 MiB of every address space. See
//! [`window`](crate::window).

use crate::PageEntryBits;
use kernel_memory_addresses::VirtualAddress;

/// Entries in a directory or a second-level table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Directory slot that maps the directory onto itself.
pub const SELF_MAP_INDEX: DirectoryIndex = DirectoryIndex::new(1023);

/// Index into the page directory (VA bits `[31:22]`).
///
/// Range is `0..1024` (checked in debug builds).
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirectoryIndex(u16);

/// Index into a second-level table (VA bits `[21:12]`).
///
/// Range is `0..1024` (checked in debug builds).
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl DirectoryIndex {
    /// Extract bits `[31:22]` of `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(va.directory_index() as u16)
    }

    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES_PER_TABLE);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0 as u32
    }
}

impl TableIndex {
    /// Extract bits `[21:12]` of `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(va.table_index() as u16)
    }

    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES_PER_TABLE);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Split `va` into its directory and second-level indices.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (DirectoryIndex, TableIndex) {
    (DirectoryIndex::from(va), TableIndex::from(va))
}

/// The page directory: 1024 entries, 4 KiB-aligned.
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PageEntryBits; ENTRIES_PER_TABLE],
}

/// A second-level page table: 1024 entries, 4 KiB-aligned.
#[repr(C, align(4096))]
pub struct SecondLevelTable {
    entries: [PageEntryBits; ENTRIES_PER_TABLE],
}

const _: () = {
    assert!(size_of::<PageDirectory>() == 4096);
    assert!(size_of::<SecondLevelTable>() == 4096);
};

impl PageDirectory {
    /// A directory with every entry zero (not present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageEntryBits::new(); ENTRIES_PER_TABLE],
        }
    }

    /// Read the entry at `i`.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: DirectoryIndex) -> PageEntryBits {
        self.entries[i.as_usize()]
    }

    /// Write the entry at `i`.
    ///
    /// Caller must handle any required TLB invalidation.
    #[inline]
    pub const fn set(&mut self, i: DirectoryIndex, e: PageEntryBits) {
        self.entries[i.as_usize()] = e;
    }
}

impl SecondLevelTable {
    /// A table with every entry zero (not present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageEntryBits::new(); ENTRIES_PER_TABLE],
        }
    }

    /// Read the entry at `i`.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PageEntryBits {
        self.entries[i.as_usize()]
    }

    /// Write the entry at `i`.
    ///
    /// Caller must handle any required TLB invalidation.
    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PageEntryBits) {
        self.entries[i.as_usize()] = e;
    }

    /// Overwrite every entry with `e`.
    #[inline]
    pub fn fill(&mut self, e: PageEntryBits) {
        self.entries.fill(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::FrameNumber;

    #[test]
    fn indices_split_the_address() {
        let (di, ti) = split_indices(VirtualAddress::new(0x4040_3123));
        assert_eq!(di, DirectoryIndex::new(0x101));
        assert_eq!(ti, TableIndex::new(0x003));

        let (di, ti) = split_indices(VirtualAddress::new(0xFFFF_FFFF));
        assert_eq!(di, SELF_MAP_INDEX);
        assert_eq!(ti.as_usize(), 1023);
    }

    #[test]
    fn set_and_get_entries() {
        let mut table = SecondLevelTable::zeroed();
        table.fill(PageEntryBits::reserved());
        table.set(TableIndex::new(5), PageEntryBits::leaf(FrameNumber::new(9)));
        assert!(table.get(TableIndex::new(5)).present());
        assert!(!table.get(TableIndex::new(6)).present());
        assert!(table.get(TableIndex::new(6)).writable());

        let mut dir = PageDirectory::zeroed();
        dir.set(SELF_MAP_INDEX, PageEntryBits::table(FrameNumber::new(3)));
        assert_eq!(dir.get(SELF_MAP_INDEX).frame(), FrameNumber::new(3));
    }
}
