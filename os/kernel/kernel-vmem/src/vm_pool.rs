//! # Virtual Memory Pools
//!
//! A [`VmPool`] hands out page-granular regions of a fixed virtual range. An
//! allocation only reserves addresses; the frames behind them arrive one page
//! at a time through the page fault handler, and go back to the frame pool
//! when the region is released.
//!
//! ## Region list
//!
//! Regions are kept as an ordered list of `(base, pages)` slots laid end to
//! end from the second page of the pool:
//!
//! ```text
//! base       base + 4K
//! ┌─────────┬─────────┬───────────────┬─────────┬───────────────────┐
//! │ (list)  │ A: 1 pg │ released (0)  │ B: 2 pg │ unused            │
//! └─────────┴─────────┴───────────────┴─────────┴───────────────────┘
//!                      ▲ free up to the next slot's base
//! ```
//!
//! A slot with zero pages is a released gap that runs to the next slot's
//! base, or to the pool end for the last slot. Two released slots are never
//! adjacent. The first page is kept back for the list itself, which holds at
//! most [`MAX_REGIONS`] slots (one page of 8-byte records).

use crate::hardware::PagingHardware;
use crate::page_table::{PageTable, PageTableError, PagingContext};
use crate::window::TABLE_WINDOW_BASE;
use arrayvec::ArrayVec;
use kernel_alloc::{PhysMapper, PoolId};
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, VirtualPage, pages_for};
use log::{debug, info, warn};

/// Slots in a pool's region list.
pub const MAX_REGIONS: usize = PAGE_SIZE as usize / size_of::<Region>();

/// One slot of the region list.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Region {
    pub base: VirtualAddress,
    /// Zero for a released slot.
    pub pages: u32,
}

const _: () = assert!(size_of::<Region>() == 8);

impl Region {
    #[inline]
    #[must_use]
    pub const fn is_released(self) -> bool {
        self.pages == 0
    }

    /// One past the last byte of a live region, in 64 bits.
    #[inline]
    #[must_use]
    pub fn end(self) -> u64 {
        u64::from(self.base.as_u32()) + u64::from(self.pages) * u64::from(PAGE_SIZE)
    }
}

/// What a [`PageTable`] knows about a registered pool.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VmPoolHandle {
    base: VirtualAddress,
    size_pages: u32,
    frame_pool: PoolId,
}

impl VmPoolHandle {
    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn size_pages(&self) -> u32 {
        self.size_pages
    }

    /// The frame pool that backs this pool's pages.
    #[inline]
    #[must_use]
    pub const fn frame_pool(&self) -> PoolId {
        self.frame_pool
    }

    /// Whether `addr` lies in `base ..= base + size`.
    ///
    /// The upper bound is inclusive: the address one past the pool counts.
    #[inline]
    #[must_use]
    pub fn is_legitimate(&self, addr: VirtualAddress) -> bool {
        (u64::from(self.base.as_u32())..=self.end()).contains(&u64::from(addr.as_u32()))
    }

    /// Whether the two pools share at least one page.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        u64::from(self.base.as_u32()) < other.end() && u64::from(other.base.as_u32()) < self.end()
    }

    /// One past the pool's last byte, in 64 bits.
    fn end(&self) -> u64 {
        u64::from(self.base.as_u32()) + u64::from(self.size_pages) * u64::from(PAGE_SIZE)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmPoolError {
    #[error("zero-sized allocation")]
    ZeroSize,
    #[error("a pool of {0} page(s) has no room for regions")]
    PoolTooSmall(u32),
    #[error("region list is full ({} slots)", MAX_REGIONS)]
    RegionListFull,
    #[error("no room for {pages} page(s)")]
    OutOfVirtualSpace { pages: u32 },
    #[error("{0} is not the start of an allocated region")]
    IllegalRelease(VirtualAddress),
    #[error(transparent)]
    Registration(#[from] PageTableError),
}

/// A range of virtual addresses handing out lazily backed regions.
pub struct VmPool {
    base: VirtualAddress,
    size_pages: u32,
    frame_pool: PoolId,
    regions: ArrayVec<Region, MAX_REGIONS>,
}

impl VmPool {
    /// Create a pool over `base .. base + size` and register it with `table`.
    ///
    /// `base` is rounded down to a page boundary and `size` up to whole
    /// pages. Pages are backed from `frame_pool` on first touch.
    ///
    /// # Errors
    /// - [`VmPoolError::PoolTooSmall`] for fewer than two pages.
    /// - [`VmPoolError::OutOfVirtualSpace`] if the range reaches into the
    ///   self-map window.
    /// - [`VmPoolError::Registration`] if `table` refuses the pool: it
    ///   reaches into the shared region, overlaps a registered pool, or the
    ///   registry is full.
    pub fn new<M: PhysMapper + ?Sized>(
        base: VirtualAddress,
        size: u32,
        frame_pool: PoolId,
        table: &mut PageTable<'_, M>,
    ) -> Result<Self, VmPoolError> {
        let base = base.align_down();
        let size_pages = pages_for(size);
        if size_pages < 2 {
            return Err(VmPoolError::PoolTooSmall(size_pages));
        }
        let end = u64::from(base.as_u32()) + u64::from(size_pages) * u64::from(PAGE_SIZE);
        if end > u64::from(TABLE_WINDOW_BASE) {
            return Err(VmPoolError::OutOfVirtualSpace { pages: size_pages });
        }

        let pool = Self {
            base,
            size_pages,
            frame_pool,
            regions: ArrayVec::new(),
        };
        table.register_pool(pool.handle())?;
        info!("VM pool at {base}: {size_pages} pages backed by {frame_pool}");
        Ok(pool)
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn size_pages(&self) -> u32 {
        self.size_pages
    }

    #[inline]
    #[must_use]
    pub const fn frame_pool(&self) -> PoolId {
        self.frame_pool
    }

    #[inline]
    #[must_use]
    pub const fn handle(&self) -> VmPoolHandle {
        VmPoolHandle {
            base: self.base,
            size_pages: self.size_pages,
            frame_pool: self.frame_pool,
        }
    }

    /// See [`VmPoolHandle::is_legitimate`].
    #[inline]
    #[must_use]
    pub fn is_legitimate(&self, addr: VirtualAddress) -> bool {
        self.handle().is_legitimate(addr)
    }

    /// The raw region list, released slots included.
    #[inline]
    #[must_use]
    pub fn slots(&self) -> &[Region] {
        &self.regions
    }

    /// Allocated regions in address order.
    pub fn regions(&self) -> impl Iterator<Item = Region> + '_ {
        self.regions.iter().copied().filter(|r| !r.is_released())
    }

    /// Released gaps as `(base, pages)`, in address order.
    pub fn free_gaps(&self) -> impl Iterator<Item = (VirtualAddress, u32)> + '_ {
        self.regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_released())
            .map(|(i, r)| (r.base, self.gap_pages(i)))
    }

    /// Reserve `size` bytes, rounded up to whole pages.
    ///
    /// The lowest released gap that fits is reused; otherwise the region goes
    /// after the last one. No frames are allocated.
    ///
    /// # Errors
    /// - [`VmPoolError::ZeroSize`] for `size == 0`.
    /// - [`VmPoolError::RegionListFull`] if a new slot is needed but the list
    ///   is full.
    /// - [`VmPoolError::OutOfVirtualSpace`] if nothing fits.
    pub fn allocate(&mut self, size: u32) -> Result<VirtualAddress, VmPoolError> {
        if size == 0 {
            return Err(VmPoolError::ZeroSize);
        }
        let pages = pages_for(size);

        let reusable = (0..self.regions.len())
            .find(|&i| self.regions[i].is_released() && self.gap_pages(i) >= pages);
        let addr = match reusable {
            Some(i) => self.reuse(i, pages),
            None => self.append(pages)?,
        };

        debug!("VM pool at {}: allocated {pages} page(s) at {addr}", self.base);
        Ok(addr)
    }

    /// Release the region starting at `addr`.
    ///
    /// Every backed page is freed through `table` and its translation is
    /// invalidated right away. The slot is then merged with released
    /// neighbours.
    ///
    /// # Errors
    /// [`VmPoolError::IllegalRelease`] if `addr` is not the base of an
    /// allocated region. Nothing changes in that case.
    pub fn release<M: PhysMapper + ?Sized, H: PagingHardware>(
        &mut self,
        addr: VirtualAddress,
        table: &PageTable<'_, M>,
        ctx: &mut PagingContext<'_, H>,
    ) -> Result<(), VmPoolError> {
        let Some(i) = self
            .regions
            .iter()
            .position(|r| !r.is_released() && r.base == addr)
        else {
            warn!("VM pool at {}: illegal release of {addr}", self.base);
            return Err(VmPoolError::IllegalRelease(addr));
        };

        let region = self.regions[i];
        let first = region.base.page().number();
        for n in first..first + region.pages {
            let page = VirtualPage::from_number(n);
            table.free_page(ctx, page);
            ctx.invalidate_page(page);
        }

        self.regions[i].pages = 0;
        if self.regions.get(i + 1).is_some_and(|r| r.is_released()) {
            self.regions.remove(i + 1);
        }
        if i > 0 && self.regions[i - 1].is_released() {
            self.regions.remove(i);
        }

        debug!(
            "VM pool at {}: released {} page(s) at {addr}",
            self.base, region.pages
        );
        Ok(())
    }

    fn end(&self) -> u64 {
        self.handle().end()
    }

    /// Pages from slot `i`'s base to the next slot's base or the pool end.
    #[allow(clippy::cast_possible_truncation)]
    fn gap_pages(&self, i: usize) -> u32 {
        let next = self
            .regions
            .get(i + 1)
            .map_or(self.end(), |r| u64::from(r.base.as_u32()));
        ((next - u64::from(self.regions[i].base.as_u32())) / u64::from(PAGE_SIZE)) as u32
    }

    /// Hand the first `pages` of released slot `i` out again.
    ///
    /// The rest of the gap becomes a released slot of its own. With a full
    /// list the rest stays inside the slot's extent and comes back when the
    /// region is released.
    fn reuse(&mut self, i: usize, pages: u32) -> VirtualAddress {
        let gap = self.gap_pages(i);
        let base = self.regions[i].base;
        self.regions[i].pages = pages;

        if gap > pages && !self.regions.is_full() {
            let rest = Region {
                base: base + pages * PAGE_SIZE,
                pages: 0,
            };
            if self.regions.get(i + 1).is_some_and(|r| r.is_released()) {
                self.regions[i + 1] = rest;
            } else {
                self.regions.insert(i + 1, rest);
            }
        }
        base
    }

    /// Put a new region of `pages` after the last slot.
    #[allow(clippy::cast_possible_truncation)]
    fn append(&mut self, pages: u32) -> Result<VirtualAddress, VmPoolError> {
        let start = match self.regions.last() {
            None => u64::from(self.base.as_u32()) + u64::from(PAGE_SIZE),
            // A trailing gap already runs to the pool end.
            Some(last) if last.is_released() => self.end(),
            Some(last) => last.end(),
        };
        if start + u64::from(pages) * u64::from(PAGE_SIZE) > self.end() {
            return Err(VmPoolError::OutOfVirtualSpace { pages });
        }
        if self.regions.is_full() {
            return Err(VmPoolError::RegionListFull);
        }

        let base = VirtualAddress::new(start as u32);
        self.regions.push(Region { base, pages });
        Ok(base)
    }
}

impl core::fmt::Debug for VmPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VmPool")
            .field("base", &self.base)
            .field("size_pages", &self.size_pages)
            .field("frame_pool", &self.frame_pool)
            .field("slots", &self.regions.len())
            .finish()
    }
}
