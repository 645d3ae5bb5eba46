//! # Physical Frame Pools
//!
//! Contiguous physical frame allocation for the kernel. Every pool manages a
//! fixed range of 4 KiB frames and records the state of each frame in a
//! packed bitmap of two bits per frame, so that runs of frames can be handed
//! out and later released by their first frame number alone.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               Frame Pool Registry                   │
//! │    • Pool lookup by id or role (kernel / process)   │
//! │    • Release routed by frame ownership              │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Contiguous Frame Pool                     │
//! │    • First-fit run allocation                       │
//! │    • Reserving caller-chosen runs                   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │        Frame Bitmap (2 bits per frame)              │
//! │    • Free / HeadOfRun / Continuation / Reserved     │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Physical Mapper                        │
//! │    • Makes the bitmap's info frames addressable     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Bitmap Storage
//!
//! A pool either keeps its bitmap in its own first frame (self-hosted, used
//! for the kernel pool) or in separate info frames supplied by the caller
//! (used for the process pool, whose info frames come out of the kernel
//! pool). One info frame describes [`FRAMES_PER_INFO_FRAME`] frames.
//!
//! ## Usage
//!
//! ```rust
//! # #[cfg(feature = "sim")] {
//! use kernel_alloc::{ContFramePool, FramePoolRegistry, sim::SimulatedRam};
//! use kernel_memory_addresses::FrameNumber;
//!
//! let ram = SimulatedRam::new(FrameNumber::new(0), 64);
//! let pool = unsafe { ContFramePool::new(&ram, FrameNumber::new(0), 64, None, 0) }.unwrap();
//!
//! let mut registry = FramePoolRegistry::new();
//! let id = registry.register(pool).unwrap();
//!
//! let run = registry.get_frames(id, 5).unwrap();
//! assert_eq!(run, FrameNumber::new(1)); // frame 0 holds the bitmap
//! registry.release_frames(run);
//! assert_eq!(registry.pool(id).unwrap().free_frames(), 63);
//! # }
//! ```
//!
//! ## Failure Semantics
//!
//! Running out of frames is an ordinary outcome and reported as `None`.
//! Bookkeeping violations (releasing a frame that does not start a run,
//! reserving frames that are in use, releasing a frame no pool owns) panic.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod frame_pool;
mod frame_state;
pub mod phys_mapper;
mod registry;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use frame_pool::{
    ContFramePool, FRAMES_PER_INFO_FRAME, FramePoolError, PoolRole, needed_info_frames,
};
pub use frame_state::{FrameBitmap, FrameState};
pub use phys_mapper::PhysMapper;
pub use registry::{FramePoolRegistry, MAX_FRAME_POOLS, PoolId};
