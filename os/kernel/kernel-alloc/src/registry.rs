//! # Frame Pool Registry
//!
//! Frames are released by number alone, so something has to know which pool
//! owns a given frame. [`FramePoolRegistry`] is a small fixed table of the
//! live pools; [`release_frames`](FramePoolRegistry::release_frames) routes a
//! release to the pool whose range contains the frame.

use crate::frame_pool::{ContFramePool, FramePoolError, PoolRole, needed_info_frames};
use crate::phys_mapper::PhysMapper;
use kernel_info::memory::MemoryLayout;
use kernel_memory_addresses::{FrameNumber, PAGE_SIZE};
use log::{info, warn};

/// Maximum number of frame pools that can be registered at once.
pub const MAX_FRAME_POOLS: usize = 4;

/// Handle of a pool inside a [`FramePoolRegistry`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PoolId(u8);

const _: () = assert!(MAX_FRAME_POOLS <= u8::MAX as usize);

impl PoolId {
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    const fn from_index(index: usize) -> Self {
        Self(index as u8)
    }

    /// Slot of the pool in its registry.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for PoolId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// Fixed-capacity table of frame pools.
#[derive(Debug)]
pub struct FramePoolRegistry<'m> {
    pools: [Option<ContFramePool<'m>>; MAX_FRAME_POOLS],
}

impl Default for FramePoolRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'m> FramePoolRegistry<'m> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pools: [const { None }; MAX_FRAME_POOLS],
        }
    }

    /// Build the kernel and process pools described by `layout`.
    ///
    /// The kernel pool is self-hosted. The process pool's bitmap is placed in
    /// frames taken from the kernel pool, and the layout's memory hole is
    /// marked inaccessible in the process pool.
    ///
    /// # Errors
    /// Any [`FramePoolError`] from constructing or registering the pools, or
    /// [`FramePoolError::InfoFramesUnavailable`] /
    /// [`FramePoolError::HoleOutsidePool`] for an unusable layout.
    ///
    /// # Safety
    /// Both pools' ranges must be addressable through `mapper` for `'m` and
    /// unused by anything else.
    pub unsafe fn from_layout<M: PhysMapper + ?Sized>(
        mapper: &M,
        layout: &MemoryLayout,
    ) -> Result<Self, FramePoolError> {
        if !layout.hole_in_process_pool() {
            return Err(FramePoolError::HoleOutsidePool);
        }

        let mut registry = Self::new();

        // SAFETY: Forwarded from the caller.
        let kernel_pool = unsafe {
            ContFramePool::new(
                mapper,
                layout.kernel_pool_start,
                layout.kernel_pool_frames(),
                None,
                0,
            )?
        };
        let kernel = registry.register(kernel_pool)?;

        let n_info = needed_info_frames(layout.process_pool_frames());
        let info_frame = registry
            .get_frames(kernel, n_info)
            .ok_or(FramePoolError::InfoFramesUnavailable(n_info))?;

        // SAFETY: Forwarded from the caller; the info frames were just allocated.
        let process_pool = unsafe {
            ContFramePool::new(
                mapper,
                layout.process_pool_start,
                layout.process_pool_frames(),
                Some(info_frame),
                n_info,
            )?
        };
        let process = registry.register(process_pool)?;

        if let Some((hole, size)) = layout.mem_hole {
            registry.mark_inaccessible(process, hole, size / PAGE_SIZE);
        }

        info!("Frame pools ready: kernel {kernel}, process {process}");
        Ok(registry)
    }

    /// Add `pool` to the registry.
    ///
    /// # Errors
    /// - [`FramePoolError::Overlap`] if its frames overlap a registered pool.
    /// - [`FramePoolError::RegistryFull`] if all slots are taken.
    pub fn register(&mut self, pool: ContFramePool<'m>) -> Result<PoolId, FramePoolError> {
        let base = pool.base_frame();
        let count = pool.frame_count();
        let end = u64::from(base.as_u32()) + u64::from(count);

        let overlaps = self.pools.iter().flatten().any(|other| {
            let other_start = u64::from(other.base_frame().as_u32());
            let other_end = other_start + u64::from(other.frame_count());
            u64::from(base.as_u32()) < other_end && other_start < end
        });
        if overlaps {
            warn!("Rejecting frame pool {base}+{count}: overlaps a registered pool");
            return Err(FramePoolError::Overlap { base, count });
        }

        let Some((index, slot)) = self
            .pools
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
        else {
            warn!("Rejecting frame pool {base}+{count}: registry is full");
            return Err(FramePoolError::RegistryFull);
        };

        *slot = Some(pool);
        Ok(PoolId::from_index(index))
    }

    /// The pool registered under `id`.
    #[must_use]
    pub fn pool(&self, id: PoolId) -> Option<&ContFramePool<'m>> {
        self.pools.get(id.index()).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn pool_mut(&mut self, id: PoolId) -> Option<&mut ContFramePool<'m>> {
        self.pools.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// The first registered pool with `role`.
    #[must_use]
    pub fn by_role(&self, role: PoolRole) -> Option<PoolId> {
        self.ids().find(|&id| self.pool(id).is_some_and(|p| p.role() == role))
    }

    /// The first self-hosted pool.
    #[must_use]
    pub fn kernel(&self) -> Option<PoolId> {
        self.by_role(PoolRole::Kernel)
    }

    /// The first pool with external info frames.
    #[must_use]
    pub fn process(&self) -> Option<PoolId> {
        self.by_role(PoolRole::Process)
    }

    /// Ids of all registered pools, in slot order.
    pub fn ids(&self) -> impl Iterator<Item = PoolId> + '_ {
        self.pools
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| PoolId::from_index(index))
    }

    /// The pool whose range contains `frame`.
    #[must_use]
    pub fn owner_of(&self, frame: FrameNumber) -> Option<PoolId> {
        self.ids()
            .find(|&id| self.pool(id).is_some_and(|p| p.contains(frame)))
    }

    /// Allocate `n` consecutive frames from pool `id`.
    ///
    /// Returns `None` for an unknown pool, `n == 0`, or when no run fits.
    pub fn get_frames(&mut self, id: PoolId, n: u32) -> Option<FrameNumber> {
        self.pool_mut(id)?.get_frames(n)
    }

    /// Reserve `first .. first + n` in pool `id`.
    ///
    /// # Panics
    /// If `id` is unknown, or see [`ContFramePool::mark_inaccessible`].
    pub fn mark_inaccessible(&mut self, id: PoolId, first: FrameNumber, n: u32) {
        let Some(pool) = self.pool_mut(id) else {
            panic!("{id} is not a registered frame pool");
        };
        pool.mark_inaccessible(first, n);
    }

    /// Release the run starting at `first` in whichever pool owns it.
    ///
    /// Returns the number of frames released.
    ///
    /// # Panics
    /// If no registered pool owns `first`, or `first` is not the head of a
    /// run.
    pub fn release_frames(&mut self, first: FrameNumber) -> u32 {
        let Some(pool) = self.pools.iter_mut().flatten().find(|p| p.contains(first)) else {
            panic!("frame {first} is not owned by any frame pool");
        };
        pool.release_frames(first)
    }
}
