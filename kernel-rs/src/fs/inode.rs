//! File headers.
//!
//! A file header (the i-node of this file system) maps a file's bytes onto
//! disk sectors: a direct table that fills the rest of the header's own
//! sector, and one doubly-indirect sector for everything past it. The
//! header is exactly one sector on disk, so fetching and writing it back is
//! a single transfer.
//!
//! A header can be initialized two ways: `allocate` builds a fresh one out
//! of the free-sector map for a newly created file, and `fetch_from` reads
//! one off disk. `extend` grows a live file in place; it synchronizes
//! against concurrent users through the file table's per-inode lock, so two
//! writers growing the same file cannot double-allocate.
//!
//! Sector numbers are `NOT_ASSIGNED` wherever nothing has been wired in;
//! deallocation tolerates such holes at every level.

use core::mem;

use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use crate::{
    fs::Bitmap,
    param::{
        div_round_up, MAX_FILE_SECTORS, NOT_ASSIGNED, NUM_DIRECT, NUM_INDIRECT, SECTOR_SIZE,
    },
    proc::KernelCtx,
};

/// On-disk file header.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct RawFileHeader {
    /// Sector of the level-1 indirect table, or `NOT_ASSIGNED`.
    pub unref_sectors: u32,
    /// Bytes in the file.
    pub num_bytes: u32,
    /// Data sectors allocated to the file.
    pub num_sectors: u32,
    /// Disk sector numbers for the first `NUM_DIRECT` data blocks.
    pub data_sectors: [u32; NUM_DIRECT],
}

const_assert!(mem::size_of::<RawFileHeader>() <= SECTOR_SIZE);

/// One indirect table: a sector holding nothing but sector numbers.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct IndirectBlock {
    sectors: [u32; NUM_INDIRECT],
}

const_assert!(mem::size_of::<IndirectBlock>() == SECTOR_SIZE);

impl IndirectBlock {
    fn empty() -> Self {
        Self {
            sectors: [NOT_ASSIGNED; NUM_INDIRECT],
        }
    }

    fn fetch(ctx: &KernelCtx<'_>, sector: u32) -> Self {
        let mut buf = [0; SECTOR_SIZE];
        ctx.kernel().disk().read_sector(ctx, sector, &mut buf);
        let mut block = IndirectBlock::new_zeroed();
        block.as_bytes_mut().copy_from_slice(&buf);
        block
    }

    fn write_back(&self, ctx: &KernelCtx<'_>, sector: u32) {
        let mut buf = [0; SECTOR_SIZE];
        buf.copy_from_slice(self.as_bytes());
        ctx.kernel().disk().write_sector(ctx, sector, &buf);
    }
}

pub struct FileHeader {
    raw: RawFileHeader,
    /// Sector this header was fetched from, or `NOT_ASSIGNED` for a header
    /// that has never touched the disk.
    sector: u32,
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            raw: RawFileHeader {
                unref_sectors: NOT_ASSIGNED,
                num_bytes: 0,
                num_sectors: 0,
                data_sectors: [NOT_ASSIGNED; NUM_DIRECT],
            },
            sector: NOT_ASSIGNED,
        }
    }

    /// Read a header off disk.
    pub fn fetch_from(ctx: &KernelCtx<'_>, sector: u32) -> Self {
        let mut header = Self::new();
        header.refetch_at(ctx, sector);
        header
    }

    fn refetch_at(&mut self, ctx: &KernelCtx<'_>, sector: u32) {
        let mut buf = [0; SECTOR_SIZE];
        ctx.kernel().disk().read_sector(ctx, sector, &mut buf);
        self.raw
            .as_bytes_mut()
            .copy_from_slice(&buf[..mem::size_of::<RawFileHeader>()]);
        self.sector = sector;
    }

    /// Write the header back to `sector`.
    pub fn write_back(&mut self, ctx: &KernelCtx<'_>, sector: u32) {
        self.sector = sector;
        let mut buf = [0; SECTOR_SIZE];
        buf[..mem::size_of::<RawFileHeader>()].copy_from_slice(self.raw.as_bytes());
        ctx.kernel().disk().write_sector(ctx, sector, &buf);
    }

    pub fn raw(&self) -> &RawFileHeader {
        &self.raw
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }

    /// Bytes in the file.
    pub fn length(&self) -> u32 {
        self.raw.num_bytes
    }

    pub fn num_sectors(&self) -> u32 {
        self.raw.num_sectors
    }

    /// Record that the file's content now reaches `num_bytes`. Only ever
    /// grows into sectors that are already allocated.
    pub fn set_length(&mut self, num_bytes: u32) {
        assert!(
            div_round_up(num_bytes as usize, SECTOR_SIZE) <= self.raw.num_sectors as usize,
            "file length past allocated sectors"
        );
        self.raw.num_bytes = num_bytes;
    }

    /// Build a fresh header for a file of `file_size` bytes, taking data
    /// sectors from `free_map`. Returns false when the disk cannot hold the
    /// file; the caller then discards its bitmap copy, so a partial
    /// allocation is harmless.
    pub fn allocate(&mut self, ctx: &KernelCtx<'_>, free_map: &mut Bitmap, file_size: u32) -> bool {
        log::debug!("allocate header: {} bytes", file_size);
        self.raw.data_sectors = [NOT_ASSIGNED; NUM_DIRECT];
        self.raw.unref_sectors = NOT_ASSIGNED;
        self.raw.num_bytes = 0;
        self.raw.num_sectors = 0;

        if file_size == 0 {
            return true;
        }

        let num_sectors = div_round_up(file_size as usize, SECTOR_SIZE);
        if num_sectors > MAX_FILE_SECTORS || free_map.count_clear() < num_sectors {
            log::debug!("allocate header: no room for {} sectors", num_sectors);
            return false;
        }
        self.raw.num_bytes = file_size;
        self.raw.num_sectors = num_sectors as u32;

        for i in 0..num_sectors.min(NUM_DIRECT) {
            let sector = match free_map.find() {
                Some(s) => s,
                None => return false,
            };
            self.raw.data_sectors[i] = sector;
            ctx.kernel().disk().clear_sector(ctx, sector);
        }

        if num_sectors <= NUM_DIRECT {
            return true;
        }

        // Overflow into the two indirect levels.
        let unref = match free_map.find() {
            Some(s) => s,
            None => return false,
        };
        self.raw.unref_sectors = unref;
        let mut rest = num_sectors - NUM_DIRECT;
        let mut level1 = IndirectBlock::empty();
        for i in 0..NUM_INDIRECT {
            if rest == 0 {
                break;
            }
            let l1 = match free_map.find() {
                Some(s) => s,
                None => return false,
            };
            level1.sectors[i] = l1;
            let mut level2 = IndirectBlock::empty();
            for slot in level2.sectors.iter_mut() {
                if rest == 0 {
                    break;
                }
                let sector = match free_map.find() {
                    Some(s) => s,
                    None => return false,
                };
                *slot = sector;
                ctx.kernel().disk().clear_sector(ctx, sector);
                rest -= 1;
            }
            level2.write_back(ctx, l1);
        }
        level1.write_back(ctx, unref);
        rest == 0
    }

    /// Give every sector of this file back to `free_map` and reset the
    /// header. Partial allocations (holes at any level) are fine.
    pub fn deallocate(&mut self, ctx: &KernelCtx<'_>, free_map: &mut Bitmap) {
        let direct = (self.raw.num_sectors as usize).min(NUM_DIRECT);
        for i in 0..direct {
            let sector = self.raw.data_sectors[i];
            if sector != NOT_ASSIGNED {
                assert!(free_map.test(sector), "deallocate: sector {} not marked", sector);
                free_map.clear(sector);
                self.raw.data_sectors[i] = NOT_ASSIGNED;
            }
        }

        if self.raw.unref_sectors != NOT_ASSIGNED {
            let level1 = IndirectBlock::fetch(ctx, self.raw.unref_sectors);
            for l1 in level1.sectors.iter() {
                if *l1 != NOT_ASSIGNED && free_map.test(*l1) {
                    let level2 = IndirectBlock::fetch(ctx, *l1);
                    for l2 in level2.sectors.iter() {
                        if *l2 != NOT_ASSIGNED && free_map.test(*l2) {
                            free_map.clear(*l2);
                        }
                    }
                    free_map.clear(*l1);
                }
            }
            free_map.clear(self.raw.unref_sectors);
        }
        self.raw.unref_sectors = NOT_ASSIGNED;
        self.raw.num_bytes = 0;
        self.raw.num_sectors = 0;
    }

    /// Grow the file by whole sectors so that it can hold `extra_bytes`
    /// more. Atomic against other users of the same inode: the per-inode
    /// file lock is held while the header is re-read, grown and written
    /// back. Returns false (leaving the on-disk state untouched) when the
    /// bitmap cannot satisfy the whole demand.
    pub fn extend(&mut self, ctx: &KernelCtx<'_>, free_map: &mut Bitmap, extra_bytes: u32) -> bool {
        assert!(
            self.sector != NOT_ASSIGNED,
            "extend: header was never on disk"
        );
        if extra_bytes == 0 {
            return true;
        }
        let node = ctx
            .kernel()
            .filetable()
            .find_or_add(self.sector, "header");
        node.file_lock().acquire(ctx);
        let result = self.extend_locked(ctx, free_map, extra_bytes);
        node.file_lock().release(ctx);
        result
    }

    fn extend_locked(
        &mut self,
        ctx: &KernelCtx<'_>,
        free_map: &mut Bitmap,
        extra_bytes: u32,
    ) -> bool {
        // Pick up growth done by whoever held the lock before us.
        let sector = self.sector;
        self.refetch_at(ctx, sector);

        let new_sectors = div_round_up(extra_bytes as usize, SECTOR_SIZE);
        let current = self.raw.num_sectors as usize;
        if current + new_sectors > MAX_FILE_SECTORS {
            return false;
        }

        // Count the whole demand up front: data sectors, plus the level-1
        // table if it does not exist yet, plus new level-2 tables.
        let mut total = new_sectors;
        if current + new_sectors > NUM_DIRECT {
            if self.raw.unref_sectors == NOT_ASSIGNED {
                total += 1;
            }
            total += div_round_up(new_sectors, NUM_INDIRECT);
        }
        if free_map.count_clear() < total {
            log::debug!("extend: need {} sectors, bitmap is short", total);
            return false;
        }

        let mut remaining = new_sectors;
        for i in current..NUM_DIRECT {
            if remaining == 0 {
                break;
            }
            let sector = match free_map.find() {
                Some(s) => s,
                None => return false,
            };
            self.raw.data_sectors[i] = sector;
            ctx.kernel().disk().clear_sector(ctx, sector);
            remaining -= 1;
        }

        if remaining > 0 {
            let mut level1 = if self.raw.unref_sectors == NOT_ASSIGNED {
                let unref = match free_map.find() {
                    Some(s) => s,
                    None => return false,
                };
                self.raw.unref_sectors = unref;
                IndirectBlock::empty()
            } else {
                IndirectBlock::fetch(ctx, self.raw.unref_sectors)
            };

            let first = current.saturating_sub(NUM_DIRECT) / NUM_INDIRECT;
            for i in first..NUM_INDIRECT {
                if remaining == 0 {
                    break;
                }
                let mut level2 = if level1.sectors[i] == NOT_ASSIGNED {
                    let l1 = match free_map.find() {
                        Some(s) => s,
                        None => return false,
                    };
                    level1.sectors[i] = l1;
                    IndirectBlock::empty()
                } else {
                    IndirectBlock::fetch(ctx, level1.sectors[i])
                };
                for slot in level2.sectors.iter_mut() {
                    if remaining == 0 {
                        break;
                    }
                    if *slot == NOT_ASSIGNED {
                        let sector = match free_map.find() {
                            Some(s) => s,
                            None => return false,
                        };
                        *slot = sector;
                        ctx.kernel().disk().clear_sector(ctx, sector);
                        remaining -= 1;
                    }
                }
                level2.write_back(ctx, level1.sectors[i]);
            }
            level1.write_back(ctx, self.raw.unref_sectors);
        }

        self.raw.num_sectors += new_sectors as u32;
        self.raw.num_bytes += extra_bytes;
        self.write_back(ctx, sector);
        remaining == 0
    }

    /// The sector storing a particular byte of the file, following the
    /// two-level indirection. None past the end of the file.
    pub fn byte_to_sector(&self, ctx: &KernelCtx<'_>, offset: u32) -> Option<u32> {
        let index = (offset as usize) / SECTOR_SIZE;
        if index >= self.raw.num_sectors as usize {
            return None;
        }
        if index < NUM_DIRECT {
            let sector = self.raw.data_sectors[index];
            return if sector == NOT_ASSIGNED { None } else { Some(sector) };
        }
        if self.raw.unref_sectors == NOT_ASSIGNED {
            return None;
        }
        let index = index - NUM_DIRECT;
        let level1 = IndirectBlock::fetch(ctx, self.raw.unref_sectors);
        let l1 = level1.sectors[index / NUM_INDIRECT];
        if l1 == NOT_ASSIGNED {
            return None;
        }
        let level2 = IndirectBlock::fetch(ctx, l1);
        let sector = level2.sectors[index % NUM_INDIRECT];
        if sector == NOT_ASSIGNED {
            None
        } else {
            Some(sector)
        }
    }

    /// Every sector reachable from this header, headers and indirect tables
    /// included. Used by the consistency check.
    pub fn reachable_sectors(&self, ctx: &KernelCtx<'_>) -> Vec<u32> {
        let mut sectors = Vec::new();
        let direct = (self.raw.num_sectors as usize).min(NUM_DIRECT);
        for i in 0..direct {
            if self.raw.data_sectors[i] != NOT_ASSIGNED {
                sectors.push(self.raw.data_sectors[i]);
            }
        }
        if self.raw.unref_sectors != NOT_ASSIGNED {
            sectors.push(self.raw.unref_sectors);
            let level1 = IndirectBlock::fetch(ctx, self.raw.unref_sectors);
            for l1 in level1.sectors.iter() {
                if *l1 == NOT_ASSIGNED {
                    continue;
                }
                sectors.push(*l1);
                let level2 = IndirectBlock::fetch(ctx, *l1);
                for l2 in level2.sectors.iter() {
                    if *l2 != NOT_ASSIGNED {
                        sectors.push(*l2);
                    }
                }
            }
        }
        sectors
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}
