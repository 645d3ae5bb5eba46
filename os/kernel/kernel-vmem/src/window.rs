//! # Self-Map Window
//!
//! Directory entry 1023 points at the directory frame. While a directory is
//! loaded, translating an address in the top 4 MiB therefore uses the
//! directory as the second-level table, and the second-level index selects a
//! directory entry:
//!
//! ```text
//! 0xFFC0_0000 | i << 12   ─►  second-level table of directory entry i
//! 0xFFFF_F000             ─►  the directory itself (i = 1023)
//! ```
//!
//! The paging code reaches a table by translating its window address through
//! the directory, so no separate mapping of table frames is needed.

use crate::table::{DirectoryIndex, SELF_MAP_INDEX};
use kernel_memory_addresses::VirtualAddress;

/// First address of the self-map window.
pub const TABLE_WINDOW_BASE: u32 = SELF_MAP_INDEX.as_u32() << 22;

/// Window address of the second-level table for directory entry `di`.
///
/// ```rust
/// # use kernel_vmem::{table::DirectoryIndex, window::table_window};
/// assert_eq!(table_window(DirectoryIndex::new(0)).as_u32(), 0xFFC0_0000);
/// assert_eq!(table_window(DirectoryIndex::new(0x100)).as_u32(), 0xFFD0_0000);
/// ```
#[inline]
#[must_use]
pub const fn table_window(di: DirectoryIndex) -> VirtualAddress {
    VirtualAddress::new(TABLE_WINDOW_BASE | (di.as_u32() << 12))
}

/// Window address of the directory itself (`0xFFFF_F000`).
#[inline]
#[must_use]
pub const fn directory_window() -> VirtualAddress {
    table_window(SELF_MAP_INDEX)
}

/// Whether `va` lies inside the self-map window.
#[inline]
#[must_use]
pub const fn is_window_address(va: VirtualAddress) -> bool {
    va.as_u32() >= TABLE_WINDOW_BASE
}
