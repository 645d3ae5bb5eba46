mod common;

use common::{MockHardware, PROTECTION, WRITE, context, process_free, ram};
use core::cell::Cell;
use kernel_alloc::PhysMapper;
use kernel_alloc::sim::SimulatedRam;
use kernel_info::memory::{MemoryLayout, SHARED_SIZE};
use kernel_memory_addresses::{FrameNumber, PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_vmem::table::{DirectoryIndex, SELF_MAP_INDEX};
use kernel_vmem::window::{directory_window, table_window};
use kernel_vmem::{
    FaultError, MAX_VM_POOLS, PageFault, PageTable, PageTableError, PagingContext, VmPool,
    VmPoolError, walk,
};

const POOL_BASE: u32 = 0x4000_0000;

#[test]
fn new_table_identity_maps_the_shared_region() {
    let ram = ram();
    let mut ctx = context(&ram);
    let table = PageTable::new(&mut ctx, &ram).unwrap();

    // Directory and one shared table from the process pool.
    assert_eq!(table.directory_frame(), FrameNumber::new(32));
    assert_eq!(process_free(&ctx), 126);

    for va in [0, 0x1234, 0x0010_0000, 0x003F_FFFF] {
        assert_eq!(
            table.translate(VirtualAddress::new(va)),
            Some(PhysicalAddress::new(va))
        );
    }
    assert_eq!(table.translate(VirtualAddress::new(0x0040_0000)), None);
    assert_eq!(table.entry(VirtualAddress::new(POOL_BASE)), None);
}

#[test]
fn self_map_window_reaches_the_tables() {
    let ram = ram();
    let mut ctx = context(&ram);
    let table = PageTable::new(&mut ctx, &ram).unwrap();

    assert_eq!(directory_window().as_u32(), 0xFFFF_F000);
    assert_eq!(
        table.translate(directory_window()),
        Some(table.directory_frame().base())
    );
    assert_eq!(
        table.translate(table_window(DirectoryIndex::new(0))),
        Some(FrameNumber::new(33).base())
    );
    assert_eq!(table.translate(table_window(DirectoryIndex::new(1))), None);

    let self_entry = table.entry(table_window(SELF_MAP_INDEX)).unwrap();
    assert!(self_entry.present() && self_entry.writable());
    assert_eq!(self_entry.frame(), table.directory_frame());
}

#[test]
fn new_table_returns_frames_when_the_pool_runs_dry() {
    let ram = ram();
    let mut ctx = context(&ram);
    let process = ctx.process_pool();

    // Leave exactly one frame: enough for the directory, not the shared table.
    let free = process_free(&ctx);
    ctx.frames_mut().get_frames(process, free - 1).unwrap();
    assert_eq!(
        PageTable::new(&mut ctx, &ram).unwrap_err(),
        PageTableError::OutOfFrames
    );
    assert_eq!(process_free(&ctx), 1);

    ctx.frames_mut().get_frames(process, 1).unwrap();
    assert_eq!(
        PageTable::new(&mut ctx, &ram).unwrap_err(),
        PageTableError::OutOfFrames
    );
}

#[test]
fn load_and_enable_paging_once() {
    let ram = ram();
    let mut ctx = context(&ram);
    let table = PageTable::new(&mut ctx, &ram).unwrap();
    assert_eq!(ctx.current_directory(), None);

    unsafe {
        table.load(&mut ctx);
        ctx.enable_paging();
        ctx.enable_paging();
    }

    assert!(ctx.is_paging_enabled());
    assert_eq!(ctx.current_directory(), Some(table.directory_frame()));
    assert_eq!(ctx.hardware().root, Some(table.directory_frame().base()));
    assert_eq!(ctx.hardware().enable_calls, 1);
}

#[test]
#[should_panic(expected = "before a page table is loaded")]
fn enabling_paging_without_a_table_panics() {
    let ram = ram();
    let mut ctx = context(&ram);
    unsafe { ctx.enable_paging() };
}

#[test]
fn first_touch_maps_a_fresh_frame() {
    let ram = ram();
    let mut ctx = context(&ram);
    let mut table = PageTable::new(&mut ctx, &ram).unwrap();
    unsafe { table.load(&mut ctx) };

    let process = ctx.process_pool();
    let mut pool = VmPool::new(VirtualAddress::new(POOL_BASE), 1 << 20, process, &mut table).unwrap();
    let addr = pool.allocate(3 * PAGE_SIZE).unwrap();
    assert_eq!(addr, VirtualAddress::new(POOL_BASE + PAGE_SIZE));

    // Reserving addresses does not use frames.
    let before = process_free(&ctx);
    assert_eq!(before, 126);
    assert_eq!(table.translate(addr), None);

    // First page: one frame for the second-level table, one for the page.
    ctx.hardware_mut().raise(addr + 0x10, WRITE);
    let first = ctx.service_fault(&table).unwrap();
    assert_eq!(first, FrameNumber::new(35));
    assert_eq!(process_free(&ctx), before - 2);
    assert_eq!(table.translate(addr + 0x10), Some(first.base() + 0x10));
    assert_eq!(
        table.translate(table_window(DirectoryIndex::new(0x100))),
        Some(FrameNumber::new(34).base())
    );

    // The new table's other entries are writable but not present.
    let untouched = table.entry(addr + 2 * PAGE_SIZE).unwrap();
    assert!(!untouched.present());
    assert!(untouched.writable());

    // Second page reuses the table.
    ctx.hardware_mut().raise(addr + PAGE_SIZE, 0);
    let second = ctx.service_fault(&table).unwrap();
    assert_ne!(first, second);
    assert_eq!(process_free(&ctx), before - 3);

    // Memory behind the mapping is usable.
    let pa = table.translate(addr + PAGE_SIZE + 8).unwrap();
    ram.write_u32(pa, 0xC0FF_EE00);
    assert_eq!(ram.read_u32(second.base() + 8), 0xC0FF_EE00);
}

#[test]
fn stale_fault_on_a_mapped_page_allocates_nothing() {
    let ram = ram();
    let mut ctx = context(&ram);
    let mut table = PageTable::new(&mut ctx, &ram).unwrap();
    unsafe { table.load(&mut ctx) };

    let process = ctx.process_pool();
    let mut pool = VmPool::new(VirtualAddress::new(POOL_BASE), 1 << 20, process, &mut table).unwrap();
    let addr = pool.allocate(1).unwrap();

    let fault = PageFault::new(addr, WRITE);
    let frame = table.handle_fault(&mut ctx, fault).unwrap();
    let free = process_free(&ctx);
    assert_eq!(table.handle_fault(&mut ctx, fault), Ok(frame));
    assert_eq!(process_free(&ctx), free);
}

#[test]
fn unserviceable_faults_are_reported() {
    let ram = ram();
    let mut ctx = context(&ram);
    let mut table = PageTable::new(&mut ctx, &ram).unwrap();
    unsafe { table.load(&mut ctx) };

    let process = ctx.process_pool();
    let mut pool = VmPool::new(VirtualAddress::new(POOL_BASE), 1 << 20, process, &mut table).unwrap();
    let addr = pool.allocate(PAGE_SIZE).unwrap();
    let free = process_free(&ctx);

    ctx.hardware_mut().raise(addr, PROTECTION);
    assert_eq!(
        ctx.service_fault(&table),
        Err(FaultError::ProtectionViolation(addr))
    );

    let outside = VirtualAddress::new(0x8000_0000);
    ctx.hardware_mut().raise(outside, WRITE);
    assert_eq!(
        ctx.service_fault(&table),
        Err(FaultError::NoOwningRegion(outside))
    );

    // The shared region belongs to no pool either.
    let shared = VirtualAddress::new(0x0000_1000);
    assert_eq!(
        table.handle_fault(&mut ctx, PageFault::new(shared, 0)),
        Err(FaultError::NoOwningRegion(shared))
    );

    assert_eq!(process_free(&ctx), free);
}

#[test]
fn faults_in_a_table_that_is_not_loaded_are_rejected() {
    let ram = ram();
    let mut ctx = context(&ram);
    let loaded = PageTable::new(&mut ctx, &ram).unwrap();
    let mut other = PageTable::new(&mut ctx, &ram).unwrap();
    unsafe { loaded.load(&mut ctx) };

    let process = ctx.process_pool();
    let mut pool = VmPool::new(VirtualAddress::new(POOL_BASE), 1 << 20, process, &mut other).unwrap();
    let addr = pool.allocate(1).unwrap();

    ctx.hardware_mut().raise(addr, WRITE);
    assert_eq!(ctx.service_fault(&other), Err(FaultError::NotCurrent));
    assert_eq!(other.entry(addr), None);
}

#[test]
fn faults_fail_when_the_frame_pool_is_exhausted() {
    let ram = ram();
    let mut ctx = context(&ram);
    let mut table = PageTable::new(&mut ctx, &ram).unwrap();
    unsafe { table.load(&mut ctx) };

    // Back the pool with the small kernel pool: 14 frames left.
    let kernel = ctx.kernel_pool();
    let mut pool = VmPool::new(VirtualAddress::new(POOL_BASE), 1 << 20, kernel, &mut table).unwrap();
    let addr = pool.allocate(32 * PAGE_SIZE).unwrap();

    let mut mapped = 0;
    let err = loop {
        let page = addr + mapped * PAGE_SIZE;
        match table.handle_fault(&mut ctx, PageFault::new(page, WRITE)) {
            Ok(_) => mapped += 1,
            Err(e) => break (page, e),
        }
    };

    // One frame went to the second-level table.
    assert_eq!(mapped, 13);
    assert_eq!(err.1, FaultError::OutOfFrames(err.0));
    assert_eq!(ctx.frames().pool(kernel).unwrap().free_frames(), 0);
}

#[test]
fn pool_registry_is_bounded() {
    let ram = ram();
    let mut ctx = context(&ram);
    let mut table = PageTable::new(&mut ctx, &ram).unwrap();
    let process = ctx.process_pool();

    let mut pools = Vec::new();
    for i in 0..MAX_VM_POOLS as u32 {
        let base = VirtualAddress::new(POOL_BASE + i * 0x0010_0000);
        pools.push(VmPool::new(base, 0x0008_0000, process, &mut table).unwrap());
    }
    assert_eq!(table.pools().count(), MAX_VM_POOLS);

    let err = VmPool::new(VirtualAddress::new(0x6000_0000), 0x0008_0000, process, &mut table)
        .unwrap_err();
    assert_eq!(err, VmPoolError::Registration(PageTableError::RegistryFull));
    assert_eq!(table.pools().count(), MAX_VM_POOLS);
}

#[test]
fn free_page_ignores_untouched_pages() {
    let ram = ram();
    let mut ctx = context(&ram);
    let mut table = PageTable::new(&mut ctx, &ram).unwrap();
    let process = ctx.process_pool();
    let mut pool = VmPool::new(VirtualAddress::new(POOL_BASE), 1 << 20, process, &mut table).unwrap();
    let addr = pool.allocate(2 * PAGE_SIZE).unwrap();

    // No second-level table yet.
    assert!(!table.free_page(&mut ctx, addr.page()));

    table
        .handle_fault(&mut ctx, PageFault::new(addr, WRITE))
        .unwrap();
    let free = process_free(&ctx);

    // Table exists, page does not.
    assert!(!table.free_page(&mut ctx, (addr + PAGE_SIZE).page()));
    assert_eq!(process_free(&ctx), free);

    assert!(table.free_page(&mut ctx, addr.page()));
    assert_eq!(process_free(&ctx), free + 1);
    assert!(!table.free_page(&mut ctx, addr.page()));
}

/// Physical memory as the kernel reaches it: all of it while paging is off,
/// only the identity-mapped shared region afterwards.
struct IdentityMapped<'r> {
    ram: &'r SimulatedRam,
    paging: Cell<bool>,
}

impl IdentityMapped<'_> {
    fn check(&self, pa: PhysicalAddress, len: usize) {
        if self.paging.get() {
            assert!(
                u64::from(pa.as_u32()) + len as u64 <= u64::from(SHARED_SIZE),
                "touched unmapped physical {pa} with paging on"
            );
        }
    }
}

impl PhysMapper for IdentityMapped<'_> {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        self.check(pa, size_of::<T>());
        unsafe { self.ram.phys_to_mut(pa) }
    }

    unsafe fn phys_bytes_mut<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8] {
        self.check(pa, len);
        unsafe { self.ram.phys_bytes_mut(pa, len) }
    }
}

#[test]
fn live_table_is_reached_through_the_window() {
    let layout = MemoryLayout::DEFAULT;
    let ram = SimulatedRam::covering(&layout);
    let phys = IdentityMapped {
        ram: &ram,
        paging: Cell::new(false),
    };
    let mut ctx =
        unsafe { PagingContext::from_layout(&phys, &layout, MockHardware::new(&ram)) }.unwrap();
    let mut table = PageTable::new(&mut ctx, &phys).unwrap();
    let directory = table.directory_frame();
    assert!(directory.base().as_u32() >= SHARED_SIZE);

    let process = ctx.process_pool();
    let mut pool = VmPool::new(VirtualAddress::new(POOL_BASE), 1 << 20, process, &mut table).unwrap();
    unsafe {
        table.load(&mut ctx);
        ctx.enable_paging();
    }
    phys.paging.set(true);

    // A new second-level table, then a page in it.
    let addr = pool.allocate(2 * PAGE_SIZE).unwrap();
    ctx.hardware_mut().raise(addr, WRITE);
    let first = ctx.service_fault(&table).unwrap();
    assert_eq!(walk(&ram, directory, addr), Some(first.base()));
    assert!(
        ctx.hardware()
            .invalidated
            .contains(&table_window(DirectoryIndex::from(addr)).page())
    );

    ctx.hardware_mut().raise(addr + PAGE_SIZE, WRITE);
    let second = ctx.service_fault(&table).unwrap();
    assert_eq!(walk(&ram, directory, addr + PAGE_SIZE), Some(second.base()));

    pool.release(addr, &table, &mut ctx).unwrap();
    assert_eq!(walk(&ram, directory, addr), None);
    assert_eq!(walk(&ram, directory, addr + PAGE_SIZE), None);
}

#[test]
fn pools_may_not_reach_into_the_shared_region() {
    let ram = ram();
    let mut ctx = context(&ram);
    let mut table = PageTable::new(&mut ctx, &ram).unwrap();
    let process = ctx.process_pool();
    let free = process_free(&ctx);

    let inside = VirtualAddress::new(0x0002_0000);
    assert_eq!(
        VmPool::new(inside, 1 << 20, process, &mut table).unwrap_err(),
        VmPoolError::Registration(PageTableError::SharedRegion(inside))
    );
    let straddling = VirtualAddress::new(SHARED_SIZE - PAGE_SIZE);
    assert_eq!(
        VmPool::new(straddling, 1 << 20, process, &mut table).unwrap_err(),
        VmPoolError::Registration(PageTableError::SharedRegion(straddling))
    );
    assert_eq!(table.pools().count(), 0);

    // Shared pages stay unowned and are never freed.
    assert_eq!(
        table.handle_fault(&mut ctx, PageFault::new(inside, WRITE)),
        Err(FaultError::NoOwningRegion(inside))
    );
    assert!(VmPool::new(VirtualAddress::new(SHARED_SIZE), 1 << 20, process, &mut table).is_ok());
    assert_eq!(process_free(&ctx), free);
}

#[test]
fn pools_may_not_overlap() {
    let ram = ram();
    let mut ctx = context(&ram);
    let mut table = PageTable::new(&mut ctx, &ram).unwrap();
    let process = ctx.process_pool();

    let first = VirtualAddress::new(POOL_BASE);
    let _pool = VmPool::new(first, 16 * PAGE_SIZE, process, &mut table).unwrap();

    for base in [POOL_BASE, POOL_BASE + 15 * PAGE_SIZE, POOL_BASE - PAGE_SIZE] {
        let base = VirtualAddress::new(base);
        assert_eq!(
            VmPool::new(base, 2 * PAGE_SIZE, process, &mut table).unwrap_err(),
            VmPoolError::Registration(PageTableError::PoolOverlap {
                new: base,
                existing: first,
            })
        );
    }
    assert_eq!(table.pools().count(), 1);

    // Touching on either side is fine.
    let below = VirtualAddress::new(POOL_BASE - 2 * PAGE_SIZE);
    let above = VirtualAddress::new(POOL_BASE + 16 * PAGE_SIZE);
    let _below = VmPool::new(below, 2 * PAGE_SIZE, process, &mut table).unwrap();
    let _above = VmPool::new(above, 2 * PAGE_SIZE, process, &mut table).unwrap();
    assert_eq!(table.pools().count(), 3);
}
