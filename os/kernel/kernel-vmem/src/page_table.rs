//! # Page Tables and Demand Paging
//!
//! A [`PageTable`] is one address space: a page directory frame, the
//! second-level tables hanging off it, and the [virtual memory
//! pools](crate::VmPool) registered with it. Process-wide state (frame
//! pools, the current directory, whether paging is on, the CPU) lives in a
//! [`PagingContext`].
//!
//! ## Address space layout
//!
//! ```text
//! 0x0000_0000 ┌──────────────────────────┐
//!             │ shared region            │ identity-mapped, present + writable
//! shared_size ├──────────────────────────┤
//!             │ VM pools                 │ not present until first touch
//!             │                          │
//! 0xFFC0_0000 ├──────────────────────────┤
//!             │ self-map window          │ directory entry 1023
//! 0xFFFF_FFFF └──────────────────────────┘
//! ```
//!
//! ## Faults
//!
//! Nothing outside the shared region is backed up front. The first access to
//! a page in a registered pool faults, and
//! [`handle_fault`](PageTable::handle_fault) allocates a frame from that
//! pool's frame pool (plus one for the second-level table if the directory
//! entry was empty) and maps it.
//!
//! ## Memory access
//!
//! While a table is loaded and paging is on, its directory and second-level
//! tables are reached at their [window](crate::window) addresses through the
//! MMU, so the fault handler never needs the frames to be mapped anywhere
//! else. Before that, and for tables that are not loaded, they are reached
//! through the [`PhysMapper`].
//!
//! [`walk`] and [`PageTable::translate`] always go through the mapper; they
//! are software walks for inspecting a table.

use crate::entry::PageEntryBits;
use crate::fault::{FaultError, PageFault};
use crate::hardware::PagingHardware;
use crate::table::{
    DirectoryIndex, ENTRIES_PER_TABLE, PageDirectory, SELF_MAP_INDEX, SecondLevelTable,
    TableIndex, split_indices,
};
use crate::vm_pool::VmPoolHandle;
use crate::window::{directory_window, table_window};
use kernel_alloc::{FramePoolError, FramePoolRegistry, PhysMapper, PoolId};
use kernel_info::memory::MemoryLayout;
use kernel_memory_addresses::{
    FrameNumber, PAGE_SIZE, PhysicalAddress, VirtualAddress, VirtualPage, pages_for,
};
use log::{debug, error, info, trace, warn};

/// Capacity of a page table's VM pool registry.
pub const MAX_VM_POOLS: usize = 16;

/// Bytes of address space covered by one second-level table (4 MiB).
#[allow(clippy::cast_possible_truncation)]
pub const TABLE_SPAN: u32 = PAGE_SIZE * ENTRIES_PER_TABLE as u32;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PageTableError {
    #[error("out of frames for page tables")]
    OutOfFrames,
    #[error("virtual memory pool registry is full ({} pools)", MAX_VM_POOLS)]
    RegistryFull,
    #[error("virtual memory pool at {0} reaches into the shared region")]
    SharedRegion(VirtualAddress),
    #[error("virtual memory pool at {new} overlaps the pool at {existing}")]
    PoolOverlap {
        new: VirtualAddress,
        existing: VirtualAddress,
    },
}

/// The second-level entry the MMU uses for `va` under `directory`, read
/// through `mapper`. `None` if the directory entry is not present.
#[must_use]
pub fn leaf_entry<M: PhysMapper + ?Sized>(
    mapper: &M,
    directory: FrameNumber,
    va: VirtualAddress,
) -> Option<PageEntryBits> {
    let (di, ti) = split_indices(va);

    // SAFETY: The reference is dropped before returning.
    let dir_entry = unsafe { mapper.phys_to_mut::<PageDirectory>(directory.base()) }.get(di);
    if !dir_entry.present() {
        return None;
    }
    // SAFETY: As above.
    let table = unsafe { mapper.phys_to_mut::<SecondLevelTable>(dir_entry.frame().base()) };
    Some(table.get(ti))
}

/// Translate `va` under `directory` the way the MMU does.
///
/// ```rust
/// use kernel_alloc::sim::SimulatedRam;
/// use kernel_memory_addresses::{FrameNumber, VirtualAddress};
/// use kernel_vmem::PageEntryBits;
/// use kernel_vmem::table::{DirectoryIndex, PageDirectory, SecondLevelTable, TableIndex};
///
/// let ram = SimulatedRam::new(FrameNumber::new(16), 3);
/// let (dir, table, data) = (FrameNumber::new(16), FrameNumber::new(17), FrameNumber::new(18));
/// unsafe {
///     use kernel_alloc::PhysMapper;
///     ram.phys_to_mut::<PageDirectory>(dir.base())
///         .set(DirectoryIndex::new(1), PageEntryBits::table(table));
///     ram.phys_to_mut::<SecondLevelTable>(table.base())
///         .set(TableIndex::new(2), PageEntryBits::leaf(data));
/// }
///
/// let va = VirtualAddress::new(0x0040_2010);
/// assert_eq!(kernel_vmem::walk(&ram, dir, va), Some(data.base() + 0x10));
/// assert_eq!(kernel_vmem::walk(&ram, dir, VirtualAddress::new(0x0040_3000)), None);
/// ```
#[must_use]
pub fn walk<M: PhysMapper + ?Sized>(
    mapper: &M,
    directory: FrameNumber,
    va: VirtualAddress,
) -> Option<PhysicalAddress> {
    let pte = leaf_entry(mapper, directory, va)?;
    pte.present()
        .then(|| pte.frame().base() + va.page_offset())
}

/// Process-wide paging state.
///
/// Owns the frame pools and the paging hardware, and remembers which
/// directory is loaded and whether paging has been enabled.
pub struct PagingContext<'m, H: PagingHardware> {
    frames: FramePoolRegistry<'m>,
    kernel_pool: PoolId,
    process_pool: PoolId,
    shared_size: u32,
    current: Option<FrameNumber>,
    paging_enabled: bool,
    hw: H,
}

impl<'m, H: PagingHardware> PagingContext<'m, H> {
    /// Set up paging with the given frame pools.
    ///
    /// Directories and the shared region's tables come from `process_pool`.
    /// The first `shared_size` bytes of every address space are
    /// identity-mapped.
    ///
    /// # Panics
    /// If `shared_size` would reach into the self-map window.
    #[must_use]
    pub fn init(
        frames: FramePoolRegistry<'m>,
        kernel_pool: PoolId,
        process_pool: PoolId,
        shared_size: u32,
        hw: H,
    ) -> Self {
        assert!(
            shared_size.div_ceil(TABLE_SPAN) <= SELF_MAP_INDEX.as_u32(),
            "shared region of {shared_size:#x} bytes overlaps the self-map window"
        );
        info!(
            "Paging context: kernel pool {kernel_pool}, process pool {process_pool}, shared {} KiB",
            shared_size / 1024
        );
        Self {
            frames,
            kernel_pool,
            process_pool,
            shared_size,
            current: None,
            paging_enabled: false,
            hw,
        }
    }

    /// Build the frame pools of `layout` and set up paging on top of them.
    ///
    /// # Errors
    /// See [`FramePoolRegistry::from_layout`].
    ///
    /// # Safety
    /// See [`FramePoolRegistry::from_layout`].
    pub unsafe fn from_layout<M: PhysMapper + ?Sized>(
        mapper: &M,
        layout: &MemoryLayout,
        hw: H,
    ) -> Result<Self, FramePoolError> {
        // SAFETY: Forwarded from the caller.
        let frames = unsafe { FramePoolRegistry::from_layout(mapper, layout)? };
        let (Some(kernel), Some(process)) = (frames.kernel(), frames.process()) else {
            unreachable!("a layout registry always holds both pools");
        };
        Ok(Self::init(frames, kernel, process, layout.shared_size, hw))
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &FramePoolRegistry<'m> {
        &self.frames
    }

    #[inline]
    pub const fn frames_mut(&mut self) -> &mut FramePoolRegistry<'m> {
        &mut self.frames
    }

    #[inline]
    #[must_use]
    pub const fn kernel_pool(&self) -> PoolId {
        self.kernel_pool
    }

    #[inline]
    #[must_use]
    pub const fn process_pool(&self) -> PoolId {
        self.process_pool
    }

    #[inline]
    #[must_use]
    pub const fn shared_size(&self) -> u32 {
        self.shared_size
    }

    #[inline]
    #[must_use]
    pub const fn hardware(&self) -> &H {
        &self.hw
    }

    #[inline]
    pub const fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    #[inline]
    #[must_use]
    pub const fn is_paging_enabled(&self) -> bool {
        self.paging_enabled
    }

    /// Directory frame of the loaded page table, if any.
    #[inline]
    #[must_use]
    pub const fn current_directory(&self) -> Option<FrameNumber> {
        self.current
    }

    /// Turn paging on. Later calls do nothing.
    ///
    /// # Panics
    /// If no page table has been [loaded](PageTable::load).
    ///
    /// # Safety
    /// The loaded table must identity-map the running code and data.
    pub unsafe fn enable_paging(&mut self) {
        if self.paging_enabled {
            debug!("Paging already enabled");
            return;
        }
        assert!(
            self.current.is_some(),
            "cannot enable paging before a page table is loaded"
        );

        // SAFETY: Forwarded from the caller.
        unsafe { self.hw.enable() };
        self.paging_enabled = true;
        info!("Paging enabled");
    }

    /// Drop the cached translation of `page`.
    #[inline]
    pub fn invalidate_page(&mut self, page: VirtualPage) {
        self.hw.invalidate_page(page);
    }

    /// Service the page fault the CPU just raised in `table`.
    ///
    /// Reads the fault address and error code from the hardware and hands
    /// them to [`PageTable::handle_fault`].
    ///
    /// # Errors
    /// - [`FaultError::NotCurrent`] if `table` is not the loaded table.
    /// - Anything [`PageTable::handle_fault`] reports.
    ///
    /// Every error is logged; the caller decides the fate of the faulting
    /// context.
    pub fn service_fault<M: PhysMapper + ?Sized>(
        &mut self,
        table: &PageTable<'_, M>,
    ) -> Result<FrameNumber, FaultError> {
        let fault = PageFault::new(
            self.hw.current_fault_address(),
            self.hw.current_fault_flags(),
        );

        let result = if self.current == Some(table.directory_frame()) {
            table.handle_fault(self, fault)
        } else {
            Err(FaultError::NotCurrent)
        };

        if let Err(e) = result {
            error!(
                "Unserviceable page fault at {} ({}): {e}",
                fault.address,
                fault.error.explain()
            );
        }
        result
    }
}

/// A two-level page table and the VM pools that live in it.
pub struct PageTable<'p, M: PhysMapper + ?Sized> {
    directory: FrameNumber,
    mapper: &'p M,
    shared_size: u32,
    pools: [Option<VmPoolHandle>; MAX_VM_POOLS],
}

impl<'p, M: PhysMapper + ?Sized> PageTable<'p, M> {
    /// Build a new address space.
    ///
    /// The directory and one second-level table per 4 MiB of the shared
    /// region come from the process pool. The shared region is
    /// identity-mapped; every other entry is writable but not present, and
    /// directory entry 1023 maps the directory itself.
    ///
    /// # Errors
    /// [`PageTableError::OutOfFrames`] if the process pool runs dry. Frames
    /// taken before that point are returned.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new<H: PagingHardware>(
        ctx: &mut PagingContext<'_, H>,
        mapper: &'p M,
    ) -> Result<Self, PageTableError> {
        let process = ctx.process_pool;
        let shared_pages = pages_for(ctx.shared_size);
        let shared_tables = ctx.shared_size.div_ceil(TABLE_SPAN);

        let Some(directory) = ctx.frames.get_frames(process, 1) else {
            warn!("No frame left for a page directory");
            return Err(PageTableError::OutOfFrames);
        };

        // SAFETY: The frame was just allocated and nothing else refers to it.
        let dir: &mut PageDirectory = unsafe { mapper.phys_to_mut(directory.base()) };
        for i in 0..SELF_MAP_INDEX.as_u32() {
            dir.set(DirectoryIndex::new(i as u16), PageEntryBits::reserved());
        }

        for t in 0..shared_tables {
            let di = DirectoryIndex::new(t as u16);
            let Some(frame) = ctx.frames.get_frames(process, 1) else {
                for linked in 0..t {
                    let linked = dir.get(DirectoryIndex::new(linked as u16)).frame();
                    ctx.frames.release_frames(linked);
                }
                ctx.frames.release_frames(directory);
                warn!("No frame left for shared table {t}");
                return Err(PageTableError::OutOfFrames);
            };

            // SAFETY: Freshly allocated, unaliased.
            let table: &mut SecondLevelTable = unsafe { mapper.phys_to_mut(frame.base()) };
            for i in 0..ENTRIES_PER_TABLE {
                let page = t * ENTRIES_PER_TABLE as u32 + i as u32;
                let entry = if page < shared_pages {
                    PageEntryBits::leaf(FrameNumber::new(page))
                } else {
                    PageEntryBits::reserved()
                };
                table.set(TableIndex::new(i as u16), entry);
            }
            dir.set(di, PageEntryBits::table(frame));
        }

        dir.set(SELF_MAP_INDEX, PageEntryBits::table(directory));

        info!(
            "Page table {directory}: {shared_tables} shared table(s), {shared_pages} identity-mapped pages"
        );
        Ok(Self {
            directory,
            mapper,
            shared_size: ctx.shared_size,
            pools: [None; MAX_VM_POOLS],
        })
    }

    /// Frame holding the page directory.
    #[inline]
    #[must_use]
    pub const fn directory_frame(&self) -> FrameNumber {
        self.directory
    }

    /// Make this the active address space.
    ///
    /// # Safety
    /// See [`PagingHardware::load_root`].
    pub unsafe fn load<H: PagingHardware>(&self, ctx: &mut PagingContext<'_, H>) {
        // SAFETY: Forwarded from the caller.
        unsafe { ctx.hw.load_root(self.directory.base()) };
        ctx.current = Some(self.directory);
        info!("Loaded page table {}", self.directory);
    }

    /// Register a VM pool so faults inside it are served.
    ///
    /// A pool owns every frame it maps, so it may neither reach into the
    /// identity-mapped shared region nor overlap a pool registered earlier.
    /// Adjacent pools are fine.
    ///
    /// # Errors
    /// - [`PageTableError::SharedRegion`] if the pool starts below the end of
    ///   the shared region.
    /// - [`PageTableError::PoolOverlap`] if it overlaps a registered pool.
    /// - [`PageTableError::RegistryFull`] once [`MAX_VM_POOLS`] pools are
    ///   registered.
    pub fn register_pool(&mut self, handle: VmPoolHandle) -> Result<(), PageTableError> {
        if handle.base().as_u32() < self.shared_size {
            warn!(
                "Page table {}: VM pool at {} reaches into the shared region",
                self.directory,
                handle.base()
            );
            return Err(PageTableError::SharedRegion(handle.base()));
        }
        if let Some(existing) = self.pools().find(|h| h.overlaps(&handle)) {
            warn!(
                "Page table {}: VM pool at {} overlaps the pool at {}",
                self.directory,
                handle.base(),
                existing.base()
            );
            return Err(PageTableError::PoolOverlap {
                new: handle.base(),
                existing: existing.base(),
            });
        }
        let Some(slot) = self.pools.iter_mut().find(|slot| slot.is_none()) else {
            error!(
                "Page table {}: cannot register VM pool at {}, registry is full",
                self.directory,
                handle.base()
            );
            return Err(PageTableError::RegistryFull);
        };
        *slot = Some(handle);
        debug!(
            "Page table {}: registered VM pool at {} ({} pages)",
            self.directory,
            handle.base(),
            handle.size_pages()
        );
        Ok(())
    }

    /// Registered VM pools, in registration order.
    pub fn pools(&self) -> impl Iterator<Item = &VmPoolHandle> + '_ {
        self.pools.iter().flatten()
    }

    /// The first registered pool that considers `addr` legitimate.
    #[must_use]
    pub fn owning_pool(&self, addr: VirtualAddress) -> Option<VmPoolHandle> {
        self.pools().find(|h| h.is_legitimate(addr)).copied()
    }

    /// Resolve a page fault by mapping a fresh frame at the faulting page.
    ///
    /// Returns the frame now backing the page. A page that is already mapped
    /// (a stale translation) is reported as resolved without allocating.
    ///
    /// # Errors
    /// - [`FaultError::ProtectionViolation`] for faults on present pages.
    /// - [`FaultError::NoOwningRegion`] if no registered pool owns the address.
    /// - [`FaultError::OutOfFrames`] if the owning frame pool is exhausted.
    pub fn handle_fault<H: PagingHardware>(
        &self,
        ctx: &mut PagingContext<'_, H>,
        fault: PageFault,
    ) -> Result<FrameNumber, FaultError> {
        let addr = fault.address;
        if fault.error.is_protection_violation() {
            return Err(FaultError::ProtectionViolation(addr));
        }
        let Some(pool) = self.owning_pool(addr) else {
            return Err(FaultError::NoOwningRegion(addr));
        };

        let (di, ti) = split_indices(addr);

        // SAFETY: No other reference into this table's frames is live.
        let dir_entry = unsafe { self.directory_mut(ctx) }.get(di);
        if !dir_entry.present() {
            let frame = ctx
                .frames
                .get_frames(pool.frame_pool(), 1)
                .ok_or(FaultError::OutOfFrames(addr))?;
            // SAFETY: As above.
            unsafe { self.directory_mut(ctx) }.set(di, PageEntryBits::table(frame));
            ctx.invalidate_page(table_window(di).page());

            // SAFETY: As above; the table was linked just now.
            unsafe { self.linked_table(ctx, di) }.fill(PageEntryBits::reserved());
            debug!(
                "Fault at {addr}: new second-level table {frame} for directory entry {}",
                di.as_usize()
            );
        }

        // SAFETY: As above.
        let table = unsafe { self.linked_table(ctx, di) };
        let pte = table.get(ti);
        if pte.present() {
            debug!("Fault at {addr}: already mapped to {}", pte.frame());
            return Ok(pte.frame());
        }

        let frame = ctx
            .frames
            .get_frames(pool.frame_pool(), 1)
            .ok_or(FaultError::OutOfFrames(addr))?;
        table.set(ti, PageEntryBits::leaf(frame));
        trace!("Fault at {addr}: mapped {} to {frame}", addr.page());
        Ok(frame)
    }

    /// Unmap `page` and return its frame to the owning frame pool.
    ///
    /// Only the present bit is cleared. Returns whether a frame was freed;
    /// pages that were never touched are left alone. The caller invalidates
    /// the translation.
    ///
    /// # Panics
    /// If the mapped frame is not the head of a run in any frame pool.
    pub fn free_page<H: PagingHardware>(
        &self,
        ctx: &mut PagingContext<'_, H>,
        page: VirtualPage,
    ) -> bool {
        let (di, ti) = split_indices(page.base());

        // SAFETY: No other reference into this table's frames is live.
        let Some(table) = (unsafe { self.table_mut(ctx, di) }) else {
            return false;
        };
        let pte = table.get(ti);
        if !pte.present() {
            return false;
        }

        ctx.frames.release_frames(pte.frame());
        table.set(ti, pte.with_present(false));
        trace!("Freed {page} (frame {})", pte.frame());
        true
    }

    /// The second-level entry for `va`, if its table exists.
    ///
    /// Reads through the physical mapper; see [`leaf_entry`].
    #[must_use]
    pub fn entry(&self, va: VirtualAddress) -> Option<PageEntryBits> {
        leaf_entry(self.mapper, self.directory, va)
    }

    /// Software walk of `va` through this table; see [`walk`].
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        walk(self.mapper, self.directory, va)
    }

    /// Whether this table is loaded with paging on, so its windows are live.
    fn is_live<H: PagingHardware>(&self, ctx: &PagingContext<'_, H>) -> bool {
        ctx.paging_enabled && ctx.current == Some(self.directory)
    }

    /// The directory, at its window while live and through the mapper
    /// otherwise.
    ///
    /// # Safety
    /// No other reference into the directory frame may be live.
    unsafe fn directory_mut<'a, H: PagingHardware>(
        &self,
        ctx: &PagingContext<'_, H>,
    ) -> &'a mut PageDirectory {
        if self.is_live(ctx) {
            // SAFETY: Entry 1023 of the loaded directory maps it at its window.
            unsafe { ctx.hw.virt_to_mut(directory_window()) }
        } else {
            // SAFETY: Forwarded from the caller.
            unsafe { self.mapper.phys_to_mut(self.directory.base()) }
        }
    }

    /// The second-level table of directory entry `di`, or `None` if the
    /// entry is not present.
    ///
    /// # Safety
    /// No other reference into the directory or that table may be live.
    unsafe fn table_mut<'a, H: PagingHardware>(
        &self,
        ctx: &PagingContext<'_, H>,
        di: DirectoryIndex,
    ) -> Option<&'a mut SecondLevelTable> {
        // SAFETY: Forwarded from the caller; dropped before the table is taken.
        let dir_entry = unsafe { self.directory_mut(ctx) }.get(di);
        if !dir_entry.present() {
            return None;
        }
        let table = if self.is_live(ctx) {
            // SAFETY: The entry is present, so the table sits at its window.
            unsafe { ctx.hw.virt_to_mut(table_window(di)) }
        } else {
            // SAFETY: Forwarded from the caller.
            unsafe { self.mapper.phys_to_mut(dir_entry.frame().base()) }
        };
        Some(table)
    }

    /// Like [`table_mut`](Self::table_mut) for an entry known to be present.
    ///
    /// # Safety
    /// See [`table_mut`](Self::table_mut).
    unsafe fn linked_table<'a, H: PagingHardware>(
        &self,
        ctx: &PagingContext<'_, H>,
        di: DirectoryIndex,
    ) -> &'a mut SecondLevelTable {
        // SAFETY: Forwarded from the caller.
        let Some(table) = (unsafe { self.table_mut(ctx, di) }) else {
            panic!(
                "directory entry {} of {} is not present",
                di.as_usize(),
                self.directory
            );
        };
        table
    }
}

impl<M: PhysMapper + ?Sized> core::fmt::Debug for PageTable<'_, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageTable")
            .field("directory", &self.directory)
            .field("pools", &self.pools().count())
            .finish_non_exhaustive()
    }
}
