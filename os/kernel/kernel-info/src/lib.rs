//! # Kernel Memory Configuration
//!
//! Compile-time configuration shared by the frame pools and the paging code:
//! where the kernel and process frame pools live in physical memory, which
//! physical range is an unusable hole, and how much of every address space is
//! identity-mapped and shared with the kernel.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │   Low memory, kernel image      │  (not pooled)
//! 0x0020_0000 ├─────────────────────────────────┤  KERNEL_POOL_START_FRAME
//!             │   Kernel frame pool (2 MiB)     │
//! 0x0040_0000 ├─────────────────────────────────┤  PROCESS_POOL_START_FRAME
//!             │   Process frame pool (28 MiB)   │
//! 0x00F0_0000 │   ├── memory hole (1 MiB) ──┤   │  MEM_HOLE_START_FRAME
//!             │                                 │
//! 0x0200_0000 └─────────────────────────────────┘
//! ```
//!
//! The first [`SHARED_SIZE`](memory::SHARED_SIZE) bytes of every address
//! space are identity-mapped, so the kernel pool and the kernel image stay
//! addressable with paging on.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_info::memory::MemoryLayout;
//!
//! let layout = MemoryLayout::DEFAULT;
//! assert_eq!(layout.kernel_pool_frames(), 512);
//! assert_eq!(layout.process_pool_frames(), 7168);
//! assert!(layout.hole_in_process_pool());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
