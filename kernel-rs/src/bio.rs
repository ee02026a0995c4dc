//! Sector cache.
//!
//! `CacheDisk` keeps copies of recently touched sectors in memory and
//! absorbs writes: a written sector stays dirty in the cache until it is
//! evicted or flushed. Replacement is LRU by touch. Each raw transfer posts
//! an asynchronous request to the device and waits on a semaphore that the
//! device interrupt releases, which makes every operation synchronous for
//! its caller.
//!
//! `SynchDisk` wraps the cache with a lock so that concurrent threads never
//! interleave their request/wait pairs — the raw device handles only one
//! request at a time.
//!
//! Interface:
//! * `read_sector` / `write_sector` move whole sectors in and out.
//! * `clear_sector` zero-fills a sector without reading it first.
//! * `flush` writes every dirty sector back to the raw device.

use std::collections::VecDeque;

use crate::{
    machine::Disk,
    param::{CACHE_SIZE, SECTOR_SIZE},
    proc::KernelCtx,
    synch::{Lock, Semaphore, Spinlock},
};

struct SectorCache {
    sector: u32,
    dirty: bool,
    data: [u8; SECTOR_SIZE],
}

impl SectorCache {
    fn new(sector: u32) -> Self {
        Self {
            sector,
            dirty: false,
            data: [0; SECTOR_SIZE],
        }
    }
}

pub struct CacheDisk {
    disk: Disk,
    /// LRU order: least recently touched at the front.
    cache: Spinlock<VecDeque<SectorCache>>,
    /// Released by the disk interrupt when a raw request completes.
    semaphore: Semaphore,
}

impl CacheDisk {
    pub fn new() -> Self {
        Self {
            disk: Disk::new(),
            cache: Spinlock::new("sector cache", VecDeque::new()),
            semaphore: Semaphore::new("cache disk", 0),
        }
    }

    fn raw_read(&self, ctx: &KernelCtx<'_>, sector: u32, data: &mut [u8; SECTOR_SIZE]) {
        self.disk
            .read_request(sector, data, &|| self.semaphore.v(ctx));
        self.semaphore.p(ctx); // Wait for the interrupt.
    }

    fn raw_write(&self, ctx: &KernelCtx<'_>, sector: u32, data: &[u8; SECTOR_SIZE]) {
        self.disk
            .write_request(sector, data, &|| self.semaphore.v(ctx));
        self.semaphore.p(ctx); // Wait for the interrupt.
    }

    /// Write back and drop the least recently used entry once the cache is
    /// at capacity.
    fn evict_if_full(&self, ctx: &KernelCtx<'_>, cache: &mut VecDeque<SectorCache>) {
        if cache.len() >= CACHE_SIZE {
            let victim = cache.pop_front().expect("evict: empty cache");
            if victim.dirty {
                log::trace!("cache: write back sector {}", victim.sector);
                self.raw_write(ctx, victim.sector, &victim.data);
            }
        }
    }

    pub fn read_sector(&self, ctx: &KernelCtx<'_>, sector: u32, data: &mut [u8; SECTOR_SIZE]) {
        let mut cache = self.cache.lock();
        if let Some(pos) = cache.iter().position(|entry| entry.sector == sector) {
            let entry = cache.remove(pos).expect("read_sector: entry vanished");
            data.copy_from_slice(&entry.data);
            cache.push_back(entry);
            return;
        }
        self.evict_if_full(ctx, &mut cache);
        let mut entry = SectorCache::new(sector);
        self.raw_read(ctx, sector, &mut entry.data);
        data.copy_from_slice(&entry.data);
        cache.push_back(entry);
    }

    pub fn write_sector(&self, ctx: &KernelCtx<'_>, sector: u32, data: &[u8; SECTOR_SIZE]) {
        let mut cache = self.cache.lock();
        if let Some(pos) = cache.iter().position(|entry| entry.sector == sector) {
            let mut entry = cache.remove(pos).expect("write_sector: entry vanished");
            entry.data.copy_from_slice(data);
            entry.dirty = true;
            cache.push_back(entry);
            return;
        }
        self.evict_if_full(ctx, &mut cache);
        let mut entry = SectorCache::new(sector);
        entry.data.copy_from_slice(data);
        entry.dirty = true;
        cache.push_back(entry);
    }

    /// Zero a sector. The old contents are never fetched.
    pub fn clear_sector(&self, ctx: &KernelCtx<'_>, sector: u32) {
        self.write_sector(ctx, sector, &[0; SECTOR_SIZE]);
    }

    /// Push every dirty sector down to the raw device.
    pub fn flush(&self, ctx: &KernelCtx<'_>) {
        let mut cache = self.cache.lock();
        for entry in cache.iter_mut() {
            if entry.dirty {
                self.raw_write(ctx, entry.sector, &entry.data);
                entry.dirty = false;
            }
        }
    }
}

impl Default for CacheDisk {
    fn default() -> Self {
        Self::new()
    }
}

/// The synchronous disk every file system layer talks to. The lock admits
/// one disk operation at a time.
pub struct SynchDisk {
    lock: Lock,
    disk: CacheDisk,
}

impl SynchDisk {
    pub fn new() -> Self {
        Self {
            lock: Lock::new("synch disk"),
            disk: CacheDisk::new(),
        }
    }

    pub fn read_sector(&self, ctx: &KernelCtx<'_>, sector: u32, data: &mut [u8; SECTOR_SIZE]) {
        self.lock.acquire(ctx); // Only one disk I/O at a time.
        self.disk.read_sector(ctx, sector, data);
        self.lock.release(ctx);
    }

    pub fn write_sector(&self, ctx: &KernelCtx<'_>, sector: u32, data: &[u8; SECTOR_SIZE]) {
        self.lock.acquire(ctx);
        self.disk.write_sector(ctx, sector, data);
        self.lock.release(ctx);
    }

    pub fn clear_sector(&self, ctx: &KernelCtx<'_>, sector: u32) {
        self.lock.acquire(ctx);
        self.disk.clear_sector(ctx, sector);
        self.lock.release(ctx);
    }

    pub fn flush(&self, ctx: &KernelCtx<'_>) {
        self.lock.acquire(ctx);
        self.disk.flush(ctx);
        self.lock.release(ctx);
    }
}

impl Default for SynchDisk {
    fn default() -> Self {
        Self::new()
    }
}
