//! # Virtual Memory Support
//!
//! Two-level paging for a 32-bit x86 kernel (no PAE), with pages backed on
//! demand.
//!
//! ## What you get
//! - [`PageEntryBits`]: the 32-bit entry shared by directories and tables.
//! - [`PageDirectory`](table::PageDirectory) and
//!   [`SecondLevelTable`](table::SecondLevelTable), plus index types.
//! - The [self-map window](window) through which tables are reached.
//! - [`PageTable`]: one address space that maps pages when they fault.
//! - [`VmPool`]: page-granular virtual regions whose frames arrive lazily.
//! - [`PagingHardware`]: the privileged operations, implemented for the
//!   real CPU by `X86Paging` (feature `asm`, 32-bit x86 only).
//!
//! ## x86 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22     | 21‒12       | 11‒0   |
//! | Directory | Table       | Offset |
//! ```
//!
//! ```text
//!  CR3 → Page Directory → Second-level Table → Physical Page
//!          │                 │
//!          │                 └───► maps one 4 KiB page
//!          └─────────────────────► entry 1023 points back at the directory
//! ```
//!
//! | Level | Table | Entries | One entry covers |
//! |:------|:------|:--------|:-----------------|
//! | 1 | **Page Directory** | 1024 | 4 MiB |
//! | 2 | **Second-level Table** | 1024 | 4 KiB |
//!
//! ## Lifecycle
//!
//! ```rust
//! use kernel_alloc::PhysMapper;
//! use kernel_alloc::sim::SimulatedRam;
//! use kernel_info::memory::MemoryLayout;
//! use kernel_memory_addresses::{PhysicalAddress, VirtualAddress, VirtualPage};
//! use kernel_vmem::{PageTable, PagingContext, PagingHardware, VmPool};
//!
//! /// An MMU over simulated RAM.
//! struct SoftCpu<'r> { ram: &'r SimulatedRam, root: PhysicalAddress, fault: u32 }
//!
//! impl PagingHardware for SoftCpu<'_> {
//!     unsafe fn load_root(&mut self, root: PhysicalAddress) { self.root = root; }
//!     unsafe fn enable(&mut self) {}
//!     fn current_fault_address(&self) -> VirtualAddress { VirtualAddress::new(self.fault) }
//!     fn current_fault_flags(&self) -> u32 { 0b10 }
//!     fn invalidate_page(&mut self, _: VirtualPage) {}
//!     unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T {
//!         let pa = kernel_vmem::walk(self.ram, self.root.frame(), va).expect("page fault");
//!         unsafe { self.ram.phys_to_mut(pa) }
//!     }
//! }
//!
//! let layout = MemoryLayout::DEFAULT;
//! let ram = SimulatedRam::covering(&layout);
//! let cpu = SoftCpu { ram: &ram, root: PhysicalAddress::zero(), fault: 0 };
//! let mut ctx = unsafe { PagingContext::from_layout(&ram, &layout, cpu) }.unwrap();
//!
//! let mut table = PageTable::new(&mut ctx, &ram).unwrap();
//! unsafe {
//!     table.load(&mut ctx);
//!     ctx.enable_paging();
//! }
//!
//! let process = ctx.process_pool();
//! let mut heap = VmPool::new(VirtualAddress::new(0x4000_0000), 1 << 20, process, &mut table).unwrap();
//! let addr = heap.allocate(100).unwrap();
//! assert_eq!(table.translate(addr), None);
//!
//! ctx.hardware_mut().fault = addr.as_u32();
//! let frame = ctx.service_fault(&table).unwrap();
//! assert_eq!(table.translate(addr), Some(frame.base()));
//!
//! heap.release(addr, &table, &mut ctx).unwrap();
//! assert_eq!(table.translate(addr), None);
//! ```
//!
//! ## Safety
//!
//! - Mutating active mappings requires TLB maintenance; [`VmPool::release`]
//!   invalidates each page it frees, and a new second-level table
//!   invalidates its window page.
//! - The [`PhysMapper`](kernel_alloc::PhysMapper) must yield writable
//!   references to every frame a table can live in for as long as paging is
//!   off. Once the table is loaded and paging is on, the fault path reaches
//!   its tables only through the self-map window.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod entry;
mod fault;
mod hardware;
mod page_table;
pub mod table;
mod vm_pool;
pub mod window;

pub use crate::entry::PageEntryBits;
pub use crate::fault::{FaultError, PageFault, PageFaultError};
#[cfg(all(feature = "asm", target_arch = "x86"))]
pub use crate::hardware::X86Paging;
pub use crate::hardware::PagingHardware;
pub use crate::page_table::{
    MAX_VM_POOLS, PageTable, PageTableError, PagingContext, TABLE_SPAN, leaf_entry, walk,
};
pub use crate::vm_pool::{MAX_REGIONS, Region, VmPool, VmPoolError, VmPoolHandle};

/// Re-export constants as info module.
pub use kernel_info::memory as info;
