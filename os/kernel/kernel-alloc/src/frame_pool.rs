//! # Contiguous Frame Pool
//!
//! A [`ContFramePool`] manages the frames `base .. base + count` and hands
//! out runs of consecutive frames. The state of every frame lives in a
//! [`FrameBitmap`] stored in physical memory: either in the pool's own first
//! frame (self-hosted) or in separately supplied info frames.

use crate::frame_state::{FRAMES_PER_BYTE, FrameBitmap, FrameState};
use crate::phys_mapper::PhysMapper;
use kernel_memory_addresses::{FrameNumber, PAGE_SIZE};
use log::{debug, info, trace};

/// Frames whose state fits into one 4 KiB info frame.
pub const FRAMES_PER_INFO_FRAME: u32 = PAGE_SIZE * FRAMES_PER_BYTE;

/// Number of info frames needed to hold the bitmap of `n_frames` frames.
///
/// ```rust
/// # use kernel_alloc::needed_info_frames;
/// assert_eq!(needed_info_frames(0), 0);
/// assert_eq!(needed_info_frames(1), 1);
/// assert_eq!(needed_info_frames(16_384), 1);
/// assert_eq!(needed_info_frames(16_385), 2);
/// ```
#[inline]
#[must_use]
pub const fn needed_info_frames(n_frames: u32) -> u32 {
    n_frames.div_ceil(FRAMES_PER_INFO_FRAME)
}

/// What a pool is used for; decided by where its bitmap lives.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PoolRole {
    /// Self-hosted bitmap; backs kernel-resident structures.
    Kernel,
    /// Bitmap in external info frames; backs demand-paged memory.
    Process,
}

/// Invalid frame pool configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramePoolError {
    #[error("a frame pool must contain at least one group of four frames")]
    Empty,
    #[error("frame count {0} is not a multiple of 4")]
    UnalignedFrameCount(u32),
    #[error("{frames} frames do not fit into a bitmap of {info_frames} info frame(s)")]
    BitmapTooSmall { frames: u32, info_frames: u32 },
    #[error("an external info frame was given without an info frame count")]
    MissingInfoFrames,
    #[error("the frame pool registry is full")]
    RegistryFull,
    #[error("frames {base}+{count} overlap a registered pool")]
    Overlap { base: FrameNumber, count: u32 },
    #[error("no room for {0} info frame(s) in the kernel pool")]
    InfoFramesUnavailable(u32),
    #[error("the memory hole lies outside the process pool")]
    HoleOutsidePool,
}

/// Allocator for runs of consecutive physical frames.
pub struct ContFramePool<'m> {
    base: FrameNumber,
    count: u32,
    free: u32,
    role: PoolRole,
    bitmap: FrameBitmap<'m>,
}

impl<'m> ContFramePool<'m> {
    /// Create a pool over the frames `base .. base + count`.
    ///
    /// With `info_frame == None` the bitmap occupies `base` itself, which is
    /// marked as an allocated run and excluded from the free count; the pool
    /// takes the [`PoolRole::Kernel`] role. Otherwise the bitmap lives in
    /// `n_info_frames` frames starting at `info_frame` and the pool takes the
    /// [`PoolRole::Process`] role.
    ///
    /// # Errors
    /// - [`FramePoolError::Empty`] / [`FramePoolError::UnalignedFrameCount`]
    ///   if `count` is zero or not a multiple of 4.
    /// - [`FramePoolError::MissingInfoFrames`] if `info_frame` is given with
    ///   `n_info_frames == 0`.
    /// - [`FramePoolError::BitmapTooSmall`] if the bitmap does not fit.
    ///
    /// # Safety
    /// The bitmap's frames must be addressable through `mapper` for `'m`,
    /// and no other code may use them while the pool lives.
    pub unsafe fn new<M: PhysMapper + ?Sized>(
        mapper: &M,
        base: FrameNumber,
        count: u32,
        info_frame: Option<FrameNumber>,
        n_info_frames: u32,
    ) -> Result<Self, FramePoolError> {
        if count == 0 {
            return Err(FramePoolError::Empty);
        }
        if !count.is_multiple_of(FRAMES_PER_BYTE) {
            return Err(FramePoolError::UnalignedFrameCount(count));
        }

        let (bitmap_frame, info_frames, role) = match info_frame {
            None => (base, 1, PoolRole::Kernel),
            Some(_) if n_info_frames == 0 => return Err(FramePoolError::MissingInfoFrames),
            Some(frame) => (frame, n_info_frames, PoolRole::Process),
        };
        if u64::from(count) > u64::from(info_frames) * u64::from(FRAMES_PER_INFO_FRAME) {
            return Err(FramePoolError::BitmapTooSmall {
                frames: count,
                info_frames,
            });
        }

        let len = (count / FRAMES_PER_BYTE) as usize;
        // SAFETY: Caller guarantees the bitmap frames are mapped and exclusively ours.
        let bytes = unsafe { mapper.phys_bytes_mut(bitmap_frame.base(), len) };
        let mut bitmap = FrameBitmap::new(bytes, count);
        bitmap.clear();

        let mut free = count;
        if role == PoolRole::Kernel {
            bitmap.mark_run(0, 1);
            free -= 1;
        }

        info!("Frame pool ({role:?}) initialized: frames {base}+{count}, bitmap at {bitmap_frame}");
        Ok(Self {
            base,
            count,
            free,
            role,
            bitmap,
        })
    }

    /// First frame managed by the pool.
    #[inline]
    #[must_use]
    pub const fn base_frame(&self) -> FrameNumber {
        self.base
    }

    /// Number of frames in the pool's range.
    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> u32 {
        self.count
    }

    /// Frames currently available to [`get_frames`](Self::get_frames).
    #[inline]
    #[must_use]
    pub const fn free_frames(&self) -> u32 {
        self.free
    }

    /// What the pool is used for.
    #[inline]
    #[must_use]
    pub const fn role(&self) -> PoolRole {
        self.role
    }

    /// Whether `frame` lies inside this pool.
    #[inline]
    #[must_use]
    pub const fn contains(&self, frame: FrameNumber) -> bool {
        frame.as_u32() >= self.base.as_u32() && frame.as_u32() - self.base.as_u32() < self.count
    }

    /// State of `frame`, or `None` if the pool does not own it.
    #[must_use]
    pub fn state(&self, frame: FrameNumber) -> Option<FrameState> {
        self.contains(frame).then(|| self.bitmap.get(frame - self.base))
    }

    /// Allocate the lowest run of `n` free frames and return its first frame.
    ///
    /// Returns `None` if `n` is zero or no such run exists.
    pub fn get_frames(&mut self, n: u32) -> Option<FrameNumber> {
        let Some(index) = self.bitmap.find_free_run(n) else {
            debug!("Frame pool at {}: no run of {n} free frame(s)", self.base);
            return None;
        };
        self.bitmap.mark_run(index, n);
        self.free -= n;

        let first = self.base + index;
        trace!("Frame pool at {}: allocated {first}+{n}", self.base);
        Some(first)
    }

    /// Mark the `n` frames starting at `first` as one allocated run.
    ///
    /// Used for frames consumed by something other than this pool's clients,
    /// such as a memory hole or the kernel image.
    ///
    /// # Panics
    /// If the range leaves the pool or any frame in it is already in use.
    pub fn mark_inaccessible(&mut self, first: FrameNumber, n: u32) {
        if n == 0 {
            return;
        }
        let end = first.checked_add(n);
        assert!(
            self.contains(first) && end.is_some_and(|end| end - self.base <= self.count),
            "frames {first}+{n} are not inside the pool at {}+{}",
            self.base,
            self.count
        );

        self.bitmap.mark_run(first - self.base, n);
        self.free -= n;
        debug!("Frame pool at {}: marked {first}+{n} inaccessible", self.base);
    }

    /// Free the run that starts at `first` and return the number of frames
    /// released.
    ///
    /// # Panics
    /// If the pool does not own `first` or `first` is not the head of a run.
    pub fn release_frames(&mut self, first: FrameNumber) -> u32 {
        assert!(
            self.contains(first),
            "frame {first} is not inside the pool at {}+{}",
            self.base,
            self.count
        );
        let released = self.bitmap.release_run(first - self.base);
        self.free += released;
        trace!("Frame pool at {}: released {first}+{released}", self.base);
        released
    }
}

impl core::fmt::Debug for ContFramePool<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ContFramePool")
            .field("base", &self.base)
            .field("count", &self.count)
            .field("free", &self.free)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}
