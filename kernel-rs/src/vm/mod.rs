//! Address spaces, demand paging and swap.
//!
//! An address space is sized from its executable's NOFF header (code +
//! initialized data + uninitialized data + stack, rounded up to pages) and
//! starts with every page invalid and unassigned. Pages materialize on
//! demand when the machine faults on them:
//!
//! * a page that was evicted comes back from the process's private swap
//!   file, at `vpn * PAGE_SIZE`;
//! * a page inside the code or initialized-data segment is re-read from
//!   the executable;
//! * anything else (stack, bss) is zero-filled.
//!
//! When no frame is free the core map names a strict-LRU victim; eviction
//! writes the page to swap if it is dirty or has never been swapped, frees
//! the frame, and marks the owner's page-table entry `InSwap`. Each virtual
//! page is therefore in exactly one of three states: never assigned, in
//! swap, or registered in the core map under one frame.
//!
//! The TLB is a cache of the running space's page table. Refill picks its
//! slot round-robin and writes the displaced entry back into the page
//! table first, so use and dirty bits survive. On a context switch
//! `save_state`/`restore_state` do the same wholesale.

use std::sync::Arc;

use crate::{
    error::KernelError,
    file::OpenFile,
    machine::{Machine, PhysPage, PteFlags, TranslationEntry},
    noff::NoffHeader,
    param::{
        div_round_up, NEXT_PC_REG, NUM_TOTAL_REGS, PAGE_SIZE, PC_REG, STACK_REG, TLB_SIZE,
        USER_STACK_SIZE,
    },
    proc::KernelCtx,
    synch::Spinlock,
};

mod coremap;

pub use self::coremap::{CoreEntry, CoreMap};

struct SpaceInner {
    page_table: Vec<TranslationEntry>,
    /// Pages that have ever been written to the swap file. A clean page
    /// that is already in swap need not be written again on eviction.
    swapped: Vec<bool>,
}

pub struct AddressSpace {
    asid: usize,
    num_pages: usize,
    noff: NoffHeader,
    /// The executable, kept open so clean pages can be re-read.
    exe: Arc<OpenFile>,
    /// Private backing store for evicted pages.
    swap: Arc<OpenFile>,
    swap_path: String,
    inner: Spinlock<SpaceInner>,
}

impl AddressSpace {
    /// Build an address space for the program in `exe`, creating its swap
    /// file in the file system. A stale swap file with the same name is
    /// removed first.
    pub fn new(ctx: &KernelCtx<'_>, exe: Arc<OpenFile>) -> Result<Arc<Self>, KernelError> {
        let fs = ctx.kernel().fs();
        // Give the executable back should anything below fail.
        let exe = scopeguard::guard(exe, |exe| fs.close(ctx, &exe));
        let noff = NoffHeader::read_from(ctx, &exe)?;
        let size = noff.memory_size() + USER_STACK_SIZE;
        let num_pages = div_round_up(size, PAGE_SIZE);
        let asid = ctx.kernel().next_asid();
        log::debug!(
            "address space {}: {} pages ({} bytes)",
            asid,
            num_pages,
            num_pages * PAGE_SIZE
        );

        let swap_path = format!("/swap.{}", asid);
        let _ = fs.remove(ctx, &swap_path);
        fs.create(ctx, &swap_path, (num_pages * PAGE_SIZE) as u32)?;
        let swap = fs.open(ctx, &swap_path)?;
        let exe = scopeguard::ScopeGuard::into_inner(exe);

        let page_table = (0..num_pages)
            .map(|vpn| TranslationEntry {
                vpn: vpn as u32,
                page: PhysPage::NotAssigned,
                flags: PteFlags::empty(),
            })
            .collect();

        Ok(Arc::new(Self {
            asid,
            num_pages,
            noff,
            exe,
            swap,
            swap_path,
            inner: Spinlock::new(
                "address space",
                SpaceInner {
                    page_table,
                    swapped: vec![false; num_pages],
                },
            ),
        }))
    }

    pub fn asid(&self) -> usize {
        self.asid
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    pub fn page_entry(&self, vpn: u32) -> TranslationEntry {
        self.inner.lock().page_table[vpn as usize]
    }

    /// Set up the user register state for entering the program: PC at 0,
    /// stack at the top of the space with a little slack.
    pub fn init_registers(&self, ctx: &KernelCtx<'_>) {
        let machine = ctx.kernel().machine();
        for reg in 0..NUM_TOTAL_REGS {
            machine.write_register(reg, 0);
        }
        machine.write_register(PC_REG, 0);
        machine.write_register(NEXT_PC_REG, 4);
        machine.write_register(STACK_REG, (self.num_pages * PAGE_SIZE - 16) as u32);
    }

    /// Pull the live TLB back into the page table on a context switch, so
    /// use and dirty bits are not lost, and leave the TLB empty.
    pub fn save_state(&self, machine: &Machine) {
        let mut inner = self.inner.lock();
        for slot in 0..TLB_SIZE {
            let entry = machine.tlb_entry(slot);
            if entry.is_valid() && (entry.vpn as usize) < self.num_pages {
                inner.page_table[entry.vpn as usize] = entry;
            }
        }
        drop(inner);
        machine.invalidate_tlb();
    }

    /// Load the page table into the TLB the machine consults. Only the
    /// first few valid entries fit; the rest fault back in on demand.
    pub fn restore_state(&self, machine: &Machine) {
        machine.invalidate_tlb();
        let inner = self.inner.lock();
        let mut slot = 0;
        for entry in inner.page_table.iter() {
            if slot >= TLB_SIZE {
                break;
            }
            if entry.is_valid() {
                machine.set_tlb_entry(slot, *entry);
                slot += 1;
            }
        }
    }

    fn load_from_swap(&self, ctx: &KernelCtx<'_>, vpn: u32, frame: u32) {
        log::debug!("space {}: page {} back from swap into {}", self.asid, vpn, frame);
        let mut buf = [0u8; PAGE_SIZE];
        let read = self.swap.read_at(ctx, &mut buf, vpn * PAGE_SIZE as u32);
        assert_eq!(read, PAGE_SIZE, "swap file too short");
        ctx.kernel().machine().write_frame(frame, &buf);
        let mut inner = self.inner.lock();
        let entry = &mut inner.page_table[vpn as usize];
        entry.page = PhysPage::Frame(frame);
        entry.flags = PteFlags::VALID;
    }

    /// First touch of a page: pull code and initialized data out of the
    /// executable, zero-fill everything else.
    fn load_from_exe(&self, ctx: &KernelCtx<'_>, vpn: u32, frame: u32) {
        let vaddr = vpn * PAGE_SIZE as u32;
        let machine = ctx.kernel().machine();
        machine.zero_frame(frame);
        let in_file = if self.noff.code.contains(vaddr) {
            Some(self.noff.code.in_file_addr + (vaddr - self.noff.code.virtual_addr))
        } else if self.noff.init_data.contains(vaddr) {
            Some(self.noff.init_data.in_file_addr + (vaddr - self.noff.init_data.virtual_addr))
        } else {
            None
        };
        if let Some(offset) = in_file {
            log::debug!("space {}: page {} from executable into {}", self.asid, vpn, frame);
            let mut buf = [0u8; PAGE_SIZE];
            let read = self.exe.read_at(ctx, &mut buf, offset);
            machine.write_frame(frame, &buf[..read]);
        } else {
            log::debug!("space {}: page {} zero-filled into {}", self.asid, vpn, frame);
        }
        let mut inner = self.inner.lock();
        let entry = &mut inner.page_table[vpn as usize];
        entry.page = PhysPage::Frame(frame);
        entry.flags = PteFlags::VALID;
    }

    /// Evict `vpn`: write it to swap when required, release its frame and
    /// mark the page `InSwap`.
    pub fn save_page(&self, ctx: &KernelCtx<'_>, vpn: u32) {
        let machine = ctx.kernel().machine();
        let index = vpn as usize;

        // When the victim belongs to the running thread, the machine TLB
        // may hold fresher state bits than the page table; pull them back
        // and drop the slot.
        let is_current = match ctx.thread().space() {
            Some(space) => space.asid == self.asid,
            None => false,
        };
        if is_current {
            for slot in 0..TLB_SIZE {
                let entry = machine.tlb_entry(slot);
                if entry.is_valid() && entry.vpn == vpn {
                    self.inner.lock().page_table[index] = entry;
                    machine.set_tlb_entry(slot, TranslationEntry::invalid());
                    break;
                }
            }
        }

        let (frame, dirty, never_swapped) = {
            let inner = self.inner.lock();
            let entry = inner.page_table[index];
            let frame = entry
                .page
                .frame()
                .expect("save_page: page is not resident");
            (frame, entry.is_dirty(), !inner.swapped[index])
        };

        if dirty || never_swapped {
            log::debug!("space {}: page {} out to swap", self.asid, vpn);
            let mut buf = [0u8; PAGE_SIZE];
            machine.read_frame(frame, &mut buf);
            let written = self.swap.write_at(ctx, &buf, vpn * PAGE_SIZE as u32);
            assert_eq!(written, PAGE_SIZE, "swap file too short");
            self.inner.lock().swapped[index] = true;
        }

        ctx.kernel().frames().lock().clear(frame);
        machine.zero_frame(frame);
        let mut inner = self.inner.lock();
        let entry = &mut inner.page_table[index];
        entry.flags = PteFlags::empty();
        entry.page = PhysPage::InSwap;
    }

    /// Tear the space down: free its frames, drop its core map entries,
    /// close and remove its swap file, close the executable.
    pub fn destroy(&self, ctx: &KernelCtx<'_>) {
        log::debug!("address space {}: destroying {} pages", self.asid, self.num_pages);
        let frames: Vec<u32> = {
            let inner = self.inner.lock();
            inner
                .page_table
                .iter()
                .filter_map(|e| e.page.frame())
                .collect()
        };
        {
            let mut frame_map = ctx.kernel().frames().lock();
            for frame in frames {
                frame_map.clear(frame);
            }
        }
        ctx.kernel().coremap().lock().clean_space(self.asid);
        let fs = ctx.kernel().fs();
        fs.close(ctx, &self.swap);
        fs.close(ctx, &self.exe);
        let _ = fs.remove(ctx, &self.swap_path);
    }
}

/// Service a page fault for the current thread at `vaddr`.
pub fn handle_page_fault(ctx: &KernelCtx<'_>, vaddr: u32) -> Result<(), KernelError> {
    let space = ctx.thread().space().ok_or(KernelError::BadPath)?;
    update_tlb(ctx, &space, vaddr / PAGE_SIZE as u32)
}

/// Make `vpn` resident and install it in the TLB, round-robin. The entry
/// displaced from the chosen slot is written back into the page table
/// first. The frame is touched in the core map.
pub fn update_tlb(
    ctx: &KernelCtx<'_>,
    space: &Arc<AddressSpace>,
    vpn: u32,
) -> Result<(), KernelError> {
    if vpn as usize >= space.num_pages {
        log::warn!("space {}: fault past end of space at vpn {}", space.asid, vpn);
        return Err(KernelError::BadPath);
    }
    load_page(ctx, space, vpn)?;

    let machine = ctx.kernel().machine();
    let slot = machine.next_tlb_victim();
    let displaced = machine.tlb_entry(slot);
    if displaced.is_valid() && (displaced.vpn as usize) < space.num_pages {
        space.inner.lock().page_table[displaced.vpn as usize] = displaced;
    }
    let entry = space.page_entry(vpn);
    machine.set_tlb_entry(slot, entry);
    if let PhysPage::Frame(frame) = entry.page {
        ctx.kernel().coremap().lock().access(frame);
    }
    Ok(())
}

/// Make `vpn` resident, evicting somebody else's page when memory is full,
/// and register the (space, vpn, frame) triple in the core map.
fn load_page(
    ctx: &KernelCtx<'_>,
    space: &Arc<AddressSpace>,
    vpn: u32,
) -> Result<(), KernelError> {
    if space.page_entry(vpn).is_valid() {
        return Ok(());
    }

    let frame = ctx.kernel().frames().lock().find();
    let frame = match frame {
        Some(frame) => frame,
        None => {
            free_victim_frame(ctx);
            ctx.kernel()
                .frames()
                .lock()
                .find()
                .expect("no frame after eviction")
        }
    };

    let in_swap = space.page_entry(vpn).page == PhysPage::InSwap;
    if in_swap {
        space.load_from_swap(ctx, vpn, frame);
    } else {
        space.load_from_exe(ctx, vpn, frame);
    }
    ctx.kernel().coremap().lock().store(space, vpn, frame);
    Ok(())
}

/// Evict the least recently used frame in the system.
pub(crate) fn free_victim_frame(ctx: &KernelCtx<'_>) {
    let victim = ctx.kernel().coremap().lock().take_victim();
    match victim {
        Some(entry) => {
            log::debug!(
                "evicting vpn {} of space {} from frame {}",
                entry.vpn,
                entry.space.asid(),
                entry.frame
            );
            entry.space.save_page(ctx, entry.vpn);
        }
        None => panic!("out of physical memory with an empty core map"),
    }
}
