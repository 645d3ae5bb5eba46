//! # Simulated Physical Memory
//!
//! A heap-backed stand-in for physical RAM, used to exercise frame pools and
//! page tables on the host. Physical frame `first + i` is the `i`-th 4 KiB
//! block of the buffer; accesses outside the simulated range panic.

extern crate alloc;

use crate::phys_mapper::PhysMapper;
use alloc::boxed::Box;
use core::cell::UnsafeCell;
use kernel_info::memory::MemoryLayout;
use kernel_memory_addresses::{FrameNumber, PAGE_SIZE, PhysicalAddress};

/// A 4 KiB-aligned raw frame.
#[derive(Debug)]
#[repr(C, align(4096))]
struct Aligned4K([u8; PAGE_SIZE as usize]);

/// Simulated physical memory covering the frames `first .. first + count`.
#[derive(Debug)]
pub struct SimulatedRam {
    first: FrameNumber,
    frames: Box<[UnsafeCell<Aligned4K>]>,
}

impl SimulatedRam {
    /// Zero-filled memory for `count` frames starting at `first`.
    #[must_use]
    pub fn new(first: FrameNumber, count: u32) -> Self {
        let frames = (0..count)
            .map(|_| UnsafeCell::new(Aligned4K([0; PAGE_SIZE as usize])))
            .collect();
        Self { first, frames }
    }

    /// Memory large enough for both frame pools of `layout`.
    #[must_use]
    pub fn covering(layout: &MemoryLayout) -> Self {
        let first = layout.kernel_pool_start.min(layout.process_pool_start);
        let end = (layout.kernel_pool_start + layout.kernel_pool_frames())
            .max(layout.process_pool_start + layout.process_pool_frames());
        Self::new(first, end - first)
    }

    #[inline]
    #[must_use]
    pub const fn first_frame(&self) -> FrameNumber {
        self.first
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn frame_count(&self) -> u32 {
        self.frames.len() as u32
    }

    /// Whether `pa .. pa + len` lies inside the simulated range.
    #[must_use]
    pub fn contains(&self, pa: PhysicalAddress, len: usize) -> bool {
        let start = u64::from(self.first.base().as_u32());
        let end = start + self.frames.len() as u64 * u64::from(PAGE_SIZE);
        let pa = u64::from(pa.as_u32());
        pa >= start && pa + len as u64 <= end
    }

    fn ptr(&self, pa: PhysicalAddress, len: usize) -> *mut u8 {
        assert!(
            self.contains(pa, len),
            "physical range {pa}+{len:#x} is outside simulated RAM"
        );
        let offset = (pa.as_u32() - self.first.base().as_u32()) as usize;
        let base = UnsafeCell::raw_get(self.frames.as_ptr()).cast::<u8>();
        // SAFETY: The range check above keeps the offset inside the buffer.
        unsafe { base.add(offset) }
    }

    #[must_use]
    pub fn read_u8(&self, pa: PhysicalAddress) -> u8 {
        // SAFETY: In bounds; the buffer is plain bytes.
        unsafe { self.ptr(pa, 1).read() }
    }

    #[must_use]
    pub fn read_u32(&self, pa: PhysicalAddress) -> u32 {
        // SAFETY: In bounds; unaligned reads are allowed.
        unsafe { self.ptr(pa, 4).cast::<u32>().read_unaligned() }
    }

    pub fn write_u32(&self, pa: PhysicalAddress, value: u32) {
        // SAFETY: In bounds; unaligned writes are allowed.
        unsafe { self.ptr(pa, 4).cast::<u32>().write_unaligned(value) }
    }

    #[must_use]
    pub fn read_u64(&self, pa: PhysicalAddress) -> u64 {
        // SAFETY: In bounds; unaligned reads are allowed.
        unsafe { self.ptr(pa, 8).cast::<u64>().read_unaligned() }
    }
}

impl PhysMapper for SimulatedRam {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = self.ptr(pa, size_of::<T>()).cast::<T>();
        debug_assert!(ptr.is_aligned(), "{pa} is misaligned for the requested type");
        // SAFETY: The caller promises `T` matches the bytes and is not aliased.
        unsafe { &mut *ptr }
    }

    unsafe fn phys_bytes_mut<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8] {
        let ptr = self.ptr(pa, len);
        // SAFETY: The range is in bounds; the caller promises it is not aliased.
        unsafe { core::slice::from_raw_parts_mut(ptr, len) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_offset_by_first() {
        let ram = SimulatedRam::new(FrameNumber::new(16), 2);
        let pa = FrameNumber::new(17).base() + 8;
        ram.write_u32(pa, 0xDEAD_BEEF);
        assert_eq!(ram.read_u32(pa), 0xDEAD_BEEF);
        assert!(ram.contains(FrameNumber::new(16).base(), 2 * 4096));
        assert!(!ram.contains(FrameNumber::new(15).base(), 1));
        assert!(!ram.contains(FrameNumber::new(17).base(), 4097));
    }

    #[test]
    fn covering_spans_both_pools() {
        let ram = SimulatedRam::covering(&MemoryLayout::DEFAULT);
        assert_eq!(ram.first_frame(), FrameNumber::new(512));
        assert_eq!(ram.frame_count(), 8192 - 512);
    }

    #[test]
    #[should_panic(expected = "outside simulated RAM")]
    fn out_of_range_access_panics() {
        let ram = SimulatedRam::new(FrameNumber::new(0), 1);
        let _ = ram.read_u8(PhysicalAddress::new(4096));
    }
}
