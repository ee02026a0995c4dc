//! The simulated machine.
//!
//! The instruction interpreter itself is not part of the kernel core; the
//! kernel sees the machine through a narrow surface: a register file, a
//! byte-addressed physical memory, a software-loaded TLB consulted on every
//! user-mode access, and the raw disk and console devices. `Machine::run`
//! stands in for the interpreter: it dispatches to a guest program body
//! installed under the executing thread's name, which is how test fixtures
//! run "user code" without compiled binaries.
//!
//! Memory accesses translate through the TLB one at a time and surface
//! faults to the caller; the kernel services the fault and retries.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bitflags::bitflags;

use crate::{
    param::{
        BAD_VADDR_REG, DEFAULT_NUM_PHYS_PAGES, NUM_TOTAL_REGS, PAGE_SIZE, TLB_SIZE,
    },
    proc::KernelCtx,
    synch::Spinlock,
};

pub mod console;
pub mod disk;

pub use self::console::Console;
pub use self::disk::Disk;

bitflags! {
    /// Per-page state bits shared by the TLB and the page tables.
    pub struct PteFlags: u8 {
        const VALID = 1 << 0;
        const USED = 1 << 1;
        const DIRTY = 1 << 2;
        const READ_ONLY = 1 << 3;
    }
}

/// Where a virtual page currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysPage {
    /// Never loaded.
    NotAssigned,
    /// Evicted to the owning process's swap file.
    InSwap,
    /// Resident in this physical frame.
    Frame(u32),
}

impl PhysPage {
    pub fn frame(self) -> Option<u32> {
        match self {
            PhysPage::Frame(f) => Some(f),
            _ => None,
        }
    }
}

/// One translation: a virtual page, its location, and its state bits.
#[derive(Debug, Clone, Copy)]
pub struct TranslationEntry {
    pub vpn: u32,
    pub page: PhysPage,
    pub flags: PteFlags,
}

impl TranslationEntry {
    pub const fn invalid() -> Self {
        Self {
            vpn: 0,
            page: PhysPage::NotAssigned,
            flags: PteFlags::empty(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags.contains(PteFlags::VALID)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(PteFlags::DIRTY)
    }
}

/// What pulled control out of user mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// The program asked for a kernel service.
    Syscall,
    /// No valid translation for this virtual address.
    PageFault(u32),
    /// Write to a read-only page.
    ReadOnly(u32),
    /// Access that the machine cannot make at all.
    AddressError(u32),
}

/// Machine geometry, fixed at boot.
#[derive(Debug, Clone, Copy)]
pub struct MachineParams {
    pub num_phys_pages: usize,
    /// Format the disk before the file system opens it.
    pub format: bool,
}

impl Default for MachineParams {
    fn default() -> Self {
        Self {
            num_phys_pages: DEFAULT_NUM_PHYS_PAGES,
            format: true,
        }
    }
}

type GuestFn = Arc<dyn Fn(&KernelCtx<'_>) + Send + Sync>;

pub struct Machine {
    num_phys_pages: usize,
    memory: Spinlock<Vec<u8>>,
    registers: Spinlock<[u32; NUM_TOTAL_REGS]>,
    tlb: Spinlock<[TranslationEntry; TLB_SIZE]>,
    /// Round-robin cursor for TLB slot replacement.
    tlb_victim: AtomicUsize,
    halted: AtomicBool,
    /// Guest program bodies, keyed by executable path. Stands in for the
    /// external instruction interpreter.
    programs: Spinlock<Vec<(String, GuestFn)>>,
}

impl Machine {
    pub fn new(params: &MachineParams) -> Self {
        Self {
            num_phys_pages: params.num_phys_pages,
            memory: Spinlock::new("machine memory", vec![0; params.num_phys_pages * PAGE_SIZE]),
            registers: Spinlock::new("machine registers", [0; NUM_TOTAL_REGS]),
            tlb: Spinlock::new("machine tlb", [TranslationEntry::invalid(); TLB_SIZE]),
            tlb_victim: AtomicUsize::new(0),
            halted: AtomicBool::new(false),
            programs: Spinlock::new("guest programs", Vec::new()),
        }
    }

    pub fn num_phys_pages(&self) -> usize {
        self.num_phys_pages
    }

    pub fn read_register(&self, reg: usize) -> u32 {
        self.registers.lock()[reg]
    }

    pub fn write_register(&self, reg: usize, value: u32) {
        self.registers.lock()[reg] = value;
    }

    pub fn save_registers(&self, out: &mut [u32; NUM_TOTAL_REGS]) {
        *out = *self.registers.lock();
    }

    pub fn restore_registers(&self, saved: &[u32; NUM_TOTAL_REGS]) {
        *self.registers.lock() = *saved;
    }

    pub fn tlb_entry(&self, slot: usize) -> TranslationEntry {
        self.tlb.lock()[slot]
    }

    pub fn set_tlb_entry(&self, slot: usize, entry: TranslationEntry) {
        self.tlb.lock()[slot] = entry;
    }

    pub fn invalidate_tlb(&self) {
        let mut tlb = self.tlb.lock();
        for entry in tlb.iter_mut() {
            *entry = TranslationEntry::invalid();
        }
    }

    /// Advance the round-robin victim cursor and return the chosen slot.
    pub fn next_tlb_victim(&self) -> usize {
        self.tlb_victim.fetch_add(1, Ordering::Relaxed) % TLB_SIZE
    }

    /// Translate a virtual address through the TLB, updating the entry's
    /// use and dirty bits. A miss sets the bad-address register and reports
    /// a page fault for the kernel to service.
    pub fn translate(&self, vaddr: u32, writing: bool) -> Result<usize, Exception> {
        let vpn = vaddr / PAGE_SIZE as u32;
        let offset = vaddr as usize % PAGE_SIZE;
        let mut tlb = self.tlb.lock();
        for entry in tlb.iter_mut() {
            if entry.is_valid() && entry.vpn == vpn {
                if writing && entry.flags.contains(PteFlags::READ_ONLY) {
                    drop(tlb);
                    self.write_register(BAD_VADDR_REG, vaddr);
                    return Err(Exception::ReadOnly(vaddr));
                }
                let frame = match entry.page.frame() {
                    Some(f) => f,
                    None => panic!("translate: valid entry without a frame"),
                };
                entry.flags.insert(PteFlags::USED);
                if writing {
                    entry.flags.insert(PteFlags::DIRTY);
                }
                let paddr = frame as usize * PAGE_SIZE + offset;
                assert!(
                    paddr < self.num_phys_pages * PAGE_SIZE,
                    "translate: frame {} out of range",
                    frame
                );
                return Ok(paddr);
            }
        }
        drop(tlb);
        self.write_register(BAD_VADDR_REG, vaddr);
        Err(Exception::PageFault(vaddr))
    }

    /// Read `size` bytes (1, 2 or 4) at a user virtual address.
    pub fn read_mem(&self, vaddr: u32, size: usize) -> Result<u32, Exception> {
        if size != 1 && size != 2 && size != 4 {
            panic!("read_mem: bad size {}", size);
        }
        if vaddr as usize % size != 0 {
            self.write_register(BAD_VADDR_REG, vaddr);
            return Err(Exception::AddressError(vaddr));
        }
        let paddr = self.translate(vaddr, false)?;
        let memory = self.memory.lock();
        let mut value: u32 = 0;
        for i in (0..size).rev() {
            value = (value << 8) | u32::from(memory[paddr + i]);
        }
        Ok(value)
    }

    /// Write `size` bytes (1, 2 or 4) at a user virtual address.
    pub fn write_mem(&self, vaddr: u32, size: usize, value: u32) -> Result<(), Exception> {
        if size != 1 && size != 2 && size != 4 {
            panic!("write_mem: bad size {}", size);
        }
        if vaddr as usize % size != 0 {
            self.write_register(BAD_VADDR_REG, vaddr);
            return Err(Exception::AddressError(vaddr));
        }
        let paddr = self.translate(vaddr, true)?;
        let mut memory = self.memory.lock();
        for i in 0..size {
            memory[paddr + i] = (value >> (8 * i)) as u8;
        }
        Ok(())
    }

    /// Copy one physical frame out of main memory.
    pub fn read_frame(&self, frame: u32, out: &mut [u8; PAGE_SIZE]) {
        let base = frame as usize * PAGE_SIZE;
        let memory = self.memory.lock();
        out.copy_from_slice(&memory[base..base + PAGE_SIZE]);
    }

    /// Copy a buffer into one physical frame.
    pub fn write_frame(&self, frame: u32, data: &[u8]) {
        assert!(data.len() <= PAGE_SIZE, "write_frame: oversized buffer");
        let base = frame as usize * PAGE_SIZE;
        let mut memory = self.memory.lock();
        memory[base..base + PAGE_SIZE].fill(0);
        memory[base..base + data.len()].copy_from_slice(data);
    }

    pub fn zero_frame(&self, frame: u32) {
        let base = frame as usize * PAGE_SIZE;
        let mut memory = self.memory.lock();
        memory[base..base + PAGE_SIZE].fill(0);
    }

    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Install a guest program body under an executable path.
    pub fn install_program<F>(&self, path: &str, body: F)
    where
        F: Fn(&KernelCtx<'_>) + Send + Sync + 'static,
    {
        self.programs
            .lock()
            .push((path.to_string(), Arc::new(body)));
    }

    /// Enter "user mode": run the program installed for the current thread.
    /// Returns when the program body does, or immediately when none is
    /// installed.
    pub fn run(&self, ctx: &KernelCtx<'_>) {
        let body = {
            let programs = self.programs.lock();
            programs
                .iter()
                .find(|(name, _)| name.as_str() == ctx.thread().name())
                .map(|(_, body)| Arc::clone(body))
        };
        if let Some(body) = body {
            body(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> Machine {
        Machine::new(&MachineParams {
            num_phys_pages: 4,
            format: false,
        })
    }

    fn mapped(vpn: u32, frame: u32) -> TranslationEntry {
        TranslationEntry {
            vpn,
            page: PhysPage::Frame(frame),
            flags: PteFlags::VALID,
        }
    }

    #[test]
    fn tlb_miss_reports_the_faulting_address() {
        let m = machine();
        assert_eq!(m.read_mem(0x84, 1), Err(Exception::PageFault(0x84)));
        assert_eq!(m.read_register(BAD_VADDR_REG), 0x84);
    }

    #[test]
    fn mapped_bytes_round_trip_and_set_dirty() {
        let m = machine();
        m.set_tlb_entry(0, mapped(1, 2));
        let vaddr = PAGE_SIZE as u32 + 5;
        m.write_mem(vaddr, 1, 0x7f).unwrap();
        assert_eq!(m.read_mem(vaddr, 1), Ok(0x7f));
        assert!(m.tlb_entry(0).is_dirty());
        assert!(m.tlb_entry(0).flags.contains(PteFlags::USED));
    }

    #[test]
    fn word_accesses_are_little_endian() {
        let m = machine();
        m.set_tlb_entry(0, mapped(0, 0));
        m.write_mem(8, 4, 0x1122_3344).unwrap();
        assert_eq!(m.read_mem(8, 1), Ok(0x44));
        assert_eq!(m.read_mem(9, 1), Ok(0x33));
        assert_eq!(m.read_mem(8, 4), Ok(0x1122_3344));
    }

    #[test]
    fn unaligned_word_access_is_an_address_error() {
        let m = machine();
        m.set_tlb_entry(0, mapped(0, 0));
        assert_eq!(m.read_mem(2, 4), Err(Exception::AddressError(2)));
    }

    #[test]
    fn read_only_pages_reject_writes() {
        let m = machine();
        let mut entry = mapped(0, 0);
        entry.flags.insert(PteFlags::READ_ONLY);
        m.set_tlb_entry(0, entry);
        assert_eq!(m.read_mem(0, 1), Ok(0));
        assert_eq!(m.write_mem(0, 1, 1), Err(Exception::ReadOnly(0)));
    }

    #[test]
    fn tlb_victims_rotate_round_robin() {
        let m = machine();
        let picks: Vec<usize> = (0..5).map(|_| m.next_tlb_victim()).collect();
        assert_eq!(picks, vec![0, 1, 2, 3, 0]);
    }
}
