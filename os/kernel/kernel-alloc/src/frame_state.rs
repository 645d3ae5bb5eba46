//! # Packed Frame States
//!
//! Each frame's state takes two bits; four frames share one byte. The
//! lowest-numbered frame of a byte sits in the two most significant bits:
//!
//! ```text
//!  bit  7 6   5 4   3 2   1 0
//!      ┌───┬─────┬─────┬─────┐
//!      │ f │ f+1 │ f+2 │ f+3 │   f = 4 * byte index
//!      └───┴─────┴─────┴─────┘
//! ```
//!
//! | Bits | State |
//! |------|-------|
//! | `00` | [`FrameState::Free`] |
//! | `01` | [`FrameState::HeadOfRun`] |
//! | `10` | [`FrameState::Continuation`] |
//! | `11` | [`FrameState::Reserved`] (never written, reads as in use) |

/// Frames described by one bitmap byte.
pub const FRAMES_PER_BYTE: u32 = 4;

/// State of a single physical frame.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FrameState {
    /// Available for allocation.
    Free = 0b00,
    /// First frame of an allocated run (runs may be one frame long).
    HeadOfRun = 0b01,
    /// Non-first frame of an allocated run.
    Continuation = 0b10,
    /// Unused encoding. Treated as "not free".
    Reserved = 0b11,
}

impl FrameState {
    /// Decode the low two bits of `bits`.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Free,
            0b01 => Self::HeadOfRun,
            0b10 => Self::Continuation,
            _ => Self::Reserved,
        }
    }

    /// The 2-bit encoding of this state.
    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    /// Whether the frame can be handed out.
    #[inline]
    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(self, Self::Free)
    }
}

/// Bit shift of frame `index` inside its byte.
#[inline]
const fn shift_of(index: u32) -> u32 {
    6 - 2 * (index % FRAMES_PER_BYTE)
}

/// Whether none of the four frames described by `byte` is free.
#[inline]
const fn byte_fully_used(byte: u8) -> bool {
    byte & 0xC0 != 0 && byte & 0x30 != 0 && byte & 0x0C != 0 && byte & 0x03 != 0
}

/// Typed view over a packed 2-bit-per-frame bitmap.
///
/// Indices are relative to the owning pool's base frame.
pub struct FrameBitmap<'a> {
    bytes: &'a mut [u8],
    frames: u32,
}

impl<'a> FrameBitmap<'a> {
    /// Wrap `bytes` as the bitmap of `frames` frames.
    ///
    /// # Panics
    /// If `bytes` is too short to describe `frames` frames.
    #[must_use]
    pub fn new(bytes: &'a mut [u8], frames: u32) -> Self {
        assert!(
            bytes.len() as u64 * u64::from(FRAMES_PER_BYTE) >= u64::from(frames),
            "bitmap of {} bytes cannot describe {frames} frames",
            bytes.len()
        );
        Self { bytes, frames }
    }

    /// Number of frames described.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.frames
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Mark every frame [`FrameState::Free`].
    pub fn clear(&mut self) {
        let used = self.frames.div_ceil(FRAMES_PER_BYTE) as usize;
        self.bytes[..used].fill(0);
    }

    /// State of frame `index`.
    ///
    /// # Panics
    /// If `index` is out of range.
    #[must_use]
    pub fn get(&self, index: u32) -> FrameState {
        assert!(index < self.frames, "frame index {index} out of range");
        let byte = self.bytes[(index / FRAMES_PER_BYTE) as usize];
        FrameState::from_bits(byte >> shift_of(index))
    }

    fn put(&mut self, index: u32, state: FrameState) {
        debug_assert!(index < self.frames);
        let shift = shift_of(index);
        let byte = &mut self.bytes[(index / FRAMES_PER_BYTE) as usize];
        *byte = (*byte & !(0b11 << shift)) | (state.into_bits() << shift);
    }

    /// Whether all frames in `first .. first + n` exist and are free.
    #[must_use]
    pub fn is_free_run(&self, first: u32, n: u32) -> bool {
        first
            .checked_add(n)
            .is_some_and(|end| end <= self.frames && (first..end).all(|i| self.get(i).is_free()))
    }

    /// Mark `first` as [`FrameState::HeadOfRun`] and the following `n - 1`
    /// frames as [`FrameState::Continuation`].
    ///
    /// # Panics
    /// If `n` is zero or the run is not entirely free.
    pub fn mark_run(&mut self, first: u32, n: u32) {
        assert!(n > 0, "cannot mark an empty run");
        assert!(
            self.is_free_run(first, n),
            "run {first}+{n} is not entirely free"
        );
        self.put(first, FrameState::HeadOfRun);
        for i in first + 1..first + n {
            self.put(i, FrameState::Continuation);
        }
    }

    /// Free the run starting at `head` and return the number of frames freed.
    ///
    /// The walk stops at the first frame that is not a continuation, which
    /// belongs to the next run (or is free) and is left untouched.
    ///
    /// # Panics
    /// If `head` is not a [`FrameState::HeadOfRun`].
    pub fn release_run(&mut self, head: u32) -> u32 {
        let state = self.get(head);
        assert!(
            state == FrameState::HeadOfRun,
            "frame index {head} is {state:?}, not the head of a run"
        );

        self.put(head, FrameState::Free);
        let mut released = 1;
        let mut i = head + 1;
        while i < self.frames && self.get(i) == FrameState::Continuation {
            self.put(i, FrameState::Free);
            released += 1;
            i += 1;
        }
        released
    }

    /// Index of the lowest run of at least `n` free frames (first fit).
    ///
    /// Whole bytes are skipped when all four of their frames are in use and
    /// consumed at once when all four are free. Runs may straddle byte
    /// boundaries.
    #[must_use]
    pub fn find_free_run(&self, n: u32) -> Option<u32> {
        if n == 0 || n > self.frames {
            return None;
        }

        let mut run_start = 0;
        let mut run_len = 0;
        let mut i = 0;
        while i < self.frames {
            if i % FRAMES_PER_BYTE == 0 && i + FRAMES_PER_BYTE <= self.frames {
                let byte = self.bytes[(i / FRAMES_PER_BYTE) as usize];
                if byte == 0 {
                    if run_len == 0 {
                        run_start = i;
                    }
                    run_len += FRAMES_PER_BYTE;
                    if run_len >= n {
                        return Some(run_start);
                    }
                    i += FRAMES_PER_BYTE;
                    continue;
                }
                if byte_fully_used(byte) {
                    run_len = 0;
                    i += FRAMES_PER_BYTE;
                    continue;
                }
            }

            if self.get(i).is_free() {
                if run_len == 0 {
                    run_start = i;
                }
                run_len += 1;
                if run_len >= n {
                    return Some(run_start);
                }
            } else {
                run_len = 0;
            }
            i += 1;
        }
        None
    }
}
