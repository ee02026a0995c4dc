//! Raw disk device.
//!
//! The disk is asynchronous: a request returns at once and the completion
//! callback plays the role of the device interrupt. Only one request may be
//! outstanding; the synchronous layers above serialize their callers. In
//! this simulation the transfer completes before the request call returns,
//! so the interrupt fires inline — the request/wait protocol of the callers
//! is unchanged.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    param::{NUM_SECTORS, SECTOR_SIZE},
    synch::Spinlock,
};

pub struct Disk {
    storage: Spinlock<Vec<u8>>,
    /// A request is in flight. At most one is legal.
    busy: AtomicBool,
}

impl Disk {
    pub fn new() -> Self {
        Self {
            storage: Spinlock::new("raw disk", vec![0; NUM_SECTORS * SECTOR_SIZE]),
            busy: AtomicBool::new(false),
        }
    }

    fn begin_request(&self, sector: u32) {
        assert!(
            (sector as usize) < NUM_SECTORS,
            "disk request past end of disk: {}",
            sector
        );
        assert!(
            !self.busy.swap(true, Ordering::SeqCst),
            "disk request while the device is busy"
        );
    }

    fn end_request(&self, interrupt: &dyn Fn()) {
        self.busy.store(false, Ordering::SeqCst);
        interrupt();
    }

    /// Start reading a sector. `interrupt` runs when the transfer is done.
    pub fn read_request(&self, sector: u32, data: &mut [u8; SECTOR_SIZE], interrupt: &dyn Fn()) {
        self.begin_request(sector);
        {
            let storage = self.storage.lock();
            let base = sector as usize * SECTOR_SIZE;
            data.copy_from_slice(&storage[base..base + SECTOR_SIZE]);
        }
        self.end_request(interrupt);
    }

    /// Start writing a sector. `interrupt` runs when the transfer is done.
    pub fn write_request(&self, sector: u32, data: &[u8; SECTOR_SIZE], interrupt: &dyn Fn()) {
        self.begin_request(sector);
        {
            let mut storage = self.storage.lock();
            let base = sector as usize * SECTOR_SIZE;
            storage[base..base + SECTOR_SIZE].copy_from_slice(data);
        }
        self.end_request(interrupt);
    }
}

impl Default for Disk {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use super::*;

    #[test]
    fn requests_complete_through_the_interrupt() {
        let disk = Disk::new();
        let interrupts = Cell::new(0u32);
        let bump = || interrupts.set(interrupts.get() + 1);

        let written = [0x5au8; SECTOR_SIZE];
        disk.write_request(7, &written, &bump);
        let mut read = [0u8; SECTOR_SIZE];
        disk.read_request(7, &mut read, &bump);

        assert_eq!(read[..], written[..]);
        assert_eq!(interrupts.get(), 2);
    }

    #[test]
    fn sectors_start_zeroed() {
        let disk = Disk::new();
        let mut read = [1u8; SECTOR_SIZE];
        disk.read_request(0, &mut read, &|| {});
        assert!(read.iter().all(|b| *b == 0));
    }

    #[test]
    #[should_panic(expected = "past end of disk")]
    fn out_of_range_sector_aborts() {
        let disk = Disk::new();
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_request(NUM_SECTORS as u32, &mut buf, &|| {});
    }
}
