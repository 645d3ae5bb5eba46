//! # Memory Layout

use kernel_memory_addresses::{FrameNumber, PAGE_SIZE};

const MIB: u32 = 1 << 20;

/// First frame of the kernel frame pool (2 MiB).
pub const KERNEL_POOL_START_FRAME: u32 = (2 * MIB) / PAGE_SIZE;

/// Size of the kernel frame pool in bytes.
pub const KERNEL_POOL_SIZE: u32 = 2 * MIB;

/// First frame of the process frame pool (4 MiB).
pub const PROCESS_POOL_START_FRAME: u32 = (4 * MIB) / PAGE_SIZE;

/// Size of the process frame pool in bytes.
pub const PROCESS_POOL_SIZE: u32 = 28 * MIB;

/// First frame of the physical hole (15 MiB) that must never be handed out.
pub const MEM_HOLE_START_FRAME: u32 = (15 * MIB) / PAGE_SIZE;

/// Size of the physical hole in bytes.
pub const MEM_HOLE_SIZE: u32 = MIB;

/// Bytes at the bottom of every address space that are identity-mapped.
pub const SHARED_SIZE: u32 = 4 * MIB;

const _: () = {
    assert!(KERNEL_POOL_START_FRAME == 512);
    assert!(PROCESS_POOL_START_FRAME == 1024);
    assert!(MEM_HOLE_START_FRAME == 3840);
    assert!(KERNEL_POOL_SIZE.is_multiple_of(4 * PAGE_SIZE));
    assert!(PROCESS_POOL_SIZE.is_multiple_of(4 * PAGE_SIZE));
    assert!(SHARED_SIZE.is_multiple_of(4 * MIB));
    assert!(KERNEL_POOL_START_FRAME + KERNEL_POOL_SIZE / PAGE_SIZE <= PROCESS_POOL_START_FRAME);
    assert!(MEM_HOLE_START_FRAME >= PROCESS_POOL_START_FRAME);
    assert!(
        MEM_HOLE_START_FRAME + MEM_HOLE_SIZE / PAGE_SIZE
            <= PROCESS_POOL_START_FRAME + PROCESS_POOL_SIZE / PAGE_SIZE
    );
};

/// Physical placement of the frame pools and the hole, plus the size of the
/// shared identity-mapped region.
///
/// [`MemoryLayout::DEFAULT`] mirrors the module constants. Tests and boards
/// with less RAM build their own values.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryLayout {
    pub kernel_pool_start: FrameNumber,
    pub kernel_pool_size: u32,
    pub process_pool_start: FrameNumber,
    pub process_pool_size: u32,
    /// Frame range `(start, size in bytes)` to reserve in the process pool.
    pub mem_hole: Option<(FrameNumber, u32)>,
    pub shared_size: u32,
}

impl MemoryLayout {
    pub const DEFAULT: Self = Self {
        kernel_pool_start: FrameNumber::new(KERNEL_POOL_START_FRAME),
        kernel_pool_size: KERNEL_POOL_SIZE,
        process_pool_start: FrameNumber::new(PROCESS_POOL_START_FRAME),
        process_pool_size: PROCESS_POOL_SIZE,
        mem_hole: Some((FrameNumber::new(MEM_HOLE_START_FRAME), MEM_HOLE_SIZE)),
        shared_size: SHARED_SIZE,
    };

    #[inline]
    #[must_use]
    pub const fn kernel_pool_frames(&self) -> u32 {
        self.kernel_pool_size / PAGE_SIZE
    }

    #[inline]
    #[must_use]
    pub const fn process_pool_frames(&self) -> u32 {
        self.process_pool_size / PAGE_SIZE
    }

    #[inline]
    #[must_use]
    pub const fn mem_hole_frames(&self) -> u32 {
        match self.mem_hole {
            Some((_, size)) => size / PAGE_SIZE,
            None => 0,
        }
    }

    /// Whether the configured hole lies entirely inside the process pool.
    #[must_use]
    pub const fn hole_in_process_pool(&self) -> bool {
        match self.mem_hole {
            Some((start, size)) => {
                let end = start.as_u32() + size / PAGE_SIZE;
                start.as_u32() >= self.process_pool_start.as_u32()
                    && end <= self.process_pool_start.as_u32() + self.process_pool_frames()
            }
            None => true,
        }
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_matches_constants() {
        let layout = MemoryLayout::default();
        assert_eq!(layout.kernel_pool_start.base().as_u32(), 0x0020_0000);
        assert_eq!(layout.process_pool_start.base().as_u32(), 0x0040_0000);
        assert_eq!(layout.mem_hole_frames(), 256);
        assert_eq!(layout.shared_size / PAGE_SIZE, 1024);
    }

    #[test]
    fn hole_outside_pool_is_detected() {
        let layout = MemoryLayout {
            mem_hole: Some((FrameNumber::new(10), MIB)),
            ..MemoryLayout::DEFAULT
        };
        assert!(!layout.hole_in_process_pool());
    }
}
