//! The kernel context structure.
//!
//! Everything that was a global in a classic kernel hangs off one `Kernel`
//! value built at boot: the simulated machine, the disk and console
//! stacks, the file system and file table, the scheduler and process
//! table, and the paging state (core map plus frame bitmap). Subsystems
//! never reach for globals; they receive a `KernelCtx` naming this
//! structure and the current thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{
    bio::SynchDisk,
    console::SynchConsole,
    file::FileTable,
    fs::{Bitmap, FileSystem},
    machine::{Machine, MachineParams},
    param::MAX_PROCESSES,
    proc::{KernelCtx, ProcessTable, Scheduler, Thread},
    synch::Spinlock,
    vm::CoreMap,
};

pub struct Kernel {
    machine: Machine,
    disk: SynchDisk,
    console: SynchConsole,
    file_system: FileSystem,
    filetable: FileTable,
    scheduler: Scheduler,
    procs: ProcessTable,
    coremap: Spinlock<CoreMap>,
    /// Which physical frames user pages occupy.
    frames: Spinlock<Bitmap>,
    next_asid: AtomicUsize,
}

impl Kernel {
    /// Build the kernel over a machine with the given geometry.
    pub fn boot(params: MachineParams) -> Arc<Self> {
        Arc::new(Self {
            machine: Machine::new(&params),
            disk: SynchDisk::new(),
            console: SynchConsole::new(),
            file_system: FileSystem::new(params.format),
            filetable: FileTable::new(),
            scheduler: Scheduler::new(),
            procs: ProcessTable::new(),
            coremap: Spinlock::new("core map", CoreMap::new()),
            frames: Spinlock::new("frame map", Bitmap::new(params.num_phys_pages)),
            next_asid: AtomicUsize::new(0),
        })
    }

    /// Enter the kernel: the calling host thread becomes the first kernel
    /// thread, the file system comes up, and `f` runs with a context. The
    /// closure's return value is handed back out.
    pub fn run<F, R>(self: &Arc<Self>, f: F) -> R
    where
        F: FnOnce(&KernelCtx<'_>) -> R,
    {
        let main = Thread::new_main(self);
        self.scheduler.set_current(Arc::clone(&main));
        let ctx = KernelCtx::new(self, &main);
        self.file_system.init(&ctx);
        f(&ctx)
    }

    /// Flush the sector cache and stop the machine.
    pub fn halt(&self, ctx: &KernelCtx<'_>) {
        log::info!("halting the machine");
        self.disk.flush(ctx);
        self.machine.halt();
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn disk(&self) -> &SynchDisk {
        &self.disk
    }

    pub fn console(&self) -> &SynchConsole {
        &self.console
    }

    pub fn fs(&self) -> &FileSystem {
        &self.file_system
    }

    pub fn filetable(&self) -> &FileTable {
        &self.filetable
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn procs(&self) -> &ProcessTable {
        &self.procs
    }

    pub fn coremap(&self) -> &Spinlock<CoreMap> {
        &self.coremap
    }

    pub fn frames(&self) -> &Spinlock<Bitmap> {
        &self.frames
    }

    pub(crate) fn next_asid(&self) -> usize {
        self.next_asid.fetch_add(1, Ordering::Relaxed) % MAX_PROCESSES
    }
}
