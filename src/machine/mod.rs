//! Simulated Machine
//!
//! The external collaborators the kernel cores consume: the interrupt
//! mask, the tick counter, the sector device, and the per-thread user
//! state snapshot seam (register file + address space).

pub mod disk;
pub mod interrupt;
pub mod stats;

pub use disk::{DiskStats, FileDisk, RamDisk, SectorDevice, SynchDisk};
pub use interrupt::{IntLevel, Interrupt};
pub use stats::Stats;

/// Registers in the simulated register file
pub const NUM_REGS: usize = 40;

/// Snapshot of the simulated CPU's register file
#[derive(Debug, Clone)]
pub struct RegisterFile(pub [i32; NUM_REGS]);

impl Default for RegisterFile {
    fn default() -> Self {
        Self([0; NUM_REGS])
    }
}

/// One virtual-to-physical page mapping
#[derive(Debug, Clone, Copy, Default)]
pub struct TranslationEntry {
    /// Virtual page number
    pub vpn: u32,
    /// Physical page number
    pub ppn: u32,
    /// Mapping is live
    pub valid: bool,
    /// Writes fault
    pub read_only: bool,
}

/// A user program's address space
///
/// The machine points at exactly one page table at a time; a thread that
/// owns an address space restores its table on every switch-in.
#[derive(Debug, Clone, Default)]
pub struct AddressSpace {
    /// Page table for this space
    pub page_table: Vec<TranslationEntry>,
}

impl AddressSpace {
    /// Address space of `num_pages` identity-mapped pages
    pub fn new(num_pages: u32) -> Self {
        let page_table = (0..num_pages)
            .map(|vpn| TranslationEntry {
                vpn,
                ppn: vpn,
                valid: true,
                read_only: false,
            })
            .collect();
        Self { page_table }
    }

    /// Capture machine translation state on switch-out
    ///
    /// The table itself lives here, so there is nothing to copy back.
    pub fn save_state(&mut self, _machine: &Machine) {}

    /// Install this space's page table on switch-in
    pub fn restore_state(&self, machine: &mut Machine) {
        machine.page_table = self.page_table.clone();
    }
}

/// The simulated machine the kernel runs on
#[derive(Debug)]
pub struct Machine {
    /// Interrupt controller
    pub interrupt: Interrupt,
    /// Tick accounting
    pub stats: Stats,
    /// Live register file
    pub registers: RegisterFile,
    /// Live page table
    pub page_table: Vec<TranslationEntry>,
}

impl Machine {
    /// Fresh machine with interrupts enabled at tick zero
    pub fn new() -> Self {
        Self {
            interrupt: Interrupt::new(),
            stats: Stats::new(),
            registers: RegisterFile::default(),
            page_table: Vec::new(),
        }
    }

    /// Current tick
    pub fn now(&self) -> u64 {
        self.stats.total_ticks
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}
