#![allow(dead_code)]

use kernel_alloc::sim::SimulatedRam;
use kernel_alloc::{ContFramePool, FramePoolRegistry, PhysMapper};
use kernel_info::memory::SHARED_SIZE;
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress, VirtualPage};
use kernel_vmem::{PagingContext, PagingHardware, walk};

/// Error code of a write to a non-present page.
pub const WRITE: u32 = 0b010;
/// Error code of a read of a present page.
pub const PROTECTION: u32 = 0b001;

/// Records what the paging code asks of the CPU, and translates virtual
/// addresses over `ram` like the MMU once paging is on.
#[derive(Debug)]
pub struct MockHardware<'r> {
    pub ram: &'r SimulatedRam,
    pub root: Option<PhysicalAddress>,
    pub enable_calls: u32,
    pub invalidated: Vec<VirtualPage>,
    pub fault_address: VirtualAddress,
    pub fault_flags: u32,
}

impl<'r> MockHardware<'r> {
    pub fn new(ram: &'r SimulatedRam) -> Self {
        Self {
            ram,
            root: None,
            enable_calls: 0,
            invalidated: Vec::new(),
            fault_address: VirtualAddress::zero(),
            fault_flags: 0,
        }
    }

    /// Pretend the CPU faulted at `addr`.
    pub fn raise(&mut self, addr: VirtualAddress, flags: u32) {
        self.fault_address = addr;
        self.fault_flags = flags;
    }
}

impl PagingHardware for MockHardware<'_> {
    unsafe fn load_root(&mut self, directory: PhysicalAddress) {
        self.root = Some(directory);
    }

    unsafe fn enable(&mut self) {
        self.enable_calls += 1;
    }

    fn current_fault_address(&self) -> VirtualAddress {
        self.fault_address
    }

    fn current_fault_flags(&self) -> u32 {
        self.fault_flags
    }

    fn invalidate_page(&mut self, page: VirtualPage) {
        self.invalidated.push(page);
    }

    unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T {
        assert!(self.enable_calls > 0, "virtual access to {va} with paging off");
        let root = self.root.expect("paging on without a root");
        let pa = walk(self.ram, root.frame(), va)
            .unwrap_or_else(|| panic!("paging code faulted at {va}"));
        unsafe { self.ram.phys_to_mut(pa) }
    }
}

/// Physical frames 16..160.
pub fn ram() -> SimulatedRam {
    SimulatedRam::new(FrameNumber::new(16), 144)
}

/// Kernel pool at 16..32 (self-hosted), process pool at 32..160 with its
/// bitmap in frame 17.
pub fn context(ram: &SimulatedRam) -> PagingContext<'static, MockHardware<'_>> {
    let mut frames = FramePoolRegistry::new();

    let kernel_pool = unsafe { ContFramePool::new(ram, FrameNumber::new(16), 16, None, 0) }.unwrap();
    let kernel = frames.register(kernel_pool).unwrap();

    let info = frames.get_frames(kernel, 1).unwrap();
    assert_eq!(info, FrameNumber::new(17));
    let process_pool =
        unsafe { ContFramePool::new(ram, FrameNumber::new(32), 128, Some(info), 1) }.unwrap();
    let process = frames.register(process_pool).unwrap();

    PagingContext::init(frames, kernel, process, SHARED_SIZE, MockHardware::new(ram))
}

/// Free frames left in the process pool.
pub fn process_free<H: PagingHardware>(ctx: &PagingContext<'_, H>) -> u32 {
    ctx.frames().pool(ctx.process_pool()).unwrap().free_frames()
}
