//! Open files and the shared file table.
//!
//! The kernel keeps one `Filenode` per inode sector that anyone has open:
//! it carries the open-user count, the deferred-delete mark, the locks that
//! serialize directory and header mutations for that sector, and the
//! reader/writer semaphores reserved for a future reader/writer policy.
//! A node appears on first use of a sector and leaves the table when its
//! last user closes, unless a deletion is pending — the closing path then
//! finishes the removal.
//!
//! An `OpenFile` is one handle onto an inode sector: it adds a private seek
//! position on top of `read_at`/`write_at`.

use std::sync::Arc;

use crate::{
    fs::FileHeader,
    param::SECTOR_SIZE,
    proc::KernelCtx,
    synch::{Lock, Semaphore, Spinlock},
};

struct NodeInfo {
    users: u32,
    readers: u32,
    remove: bool,
}

/// Shared per-inode bookkeeping, identified by the inode's header sector.
pub struct Filenode {
    sector: u32,
    /// Full path of the file, once the facade has opened it by name.
    name: Spinlock<String>,
    info: Spinlock<NodeInfo>,
    dir_lock: Lock,
    file_lock: Lock,
    can_read: Semaphore,
    can_write: Semaphore,
}

impl Filenode {
    fn new(sector: u32, name: &str) -> Self {
        Self {
            sector,
            name: Spinlock::new("filenode name", name.to_string()),
            info: Spinlock::new(
                "filenode info",
                NodeInfo {
                    users: 0,
                    readers: 0,
                    remove: false,
                },
            ),
            dir_lock: Lock::new("directory lock"),
            file_lock: Lock::new("file lock"),
            can_read: Semaphore::new("can read", 1),
            can_write: Semaphore::new("can write", 1),
        }
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_string();
    }

    pub fn users(&self) -> u32 {
        self.info.lock().users
    }

    pub fn add_user(&self) {
        self.info.lock().users += 1;
    }

    /// Drop one user; returns how many remain.
    pub fn drop_user(&self) -> u32 {
        let mut info = self.info.lock();
        assert!(info.users > 0, "filenode: close without open");
        info.users -= 1;
        info.users
    }

    pub fn marked_for_delete(&self) -> bool {
        self.info.lock().remove
    }

    pub fn mark_for_delete(&self) {
        self.info.lock().remove = true;
    }

    pub fn readers(&self) -> u32 {
        self.info.lock().readers
    }

    /// Serializes add/remove/clean on the directory stored at this sector.
    pub fn dir_lock(&self) -> &Lock {
        &self.dir_lock
    }

    /// Serializes header growth for this inode.
    pub fn file_lock(&self) -> &Lock {
        &self.file_lock
    }

    pub fn can_read(&self) -> &Semaphore {
        &self.can_read
    }

    pub fn can_write(&self) -> &Semaphore {
        &self.can_write
    }
}

/// The kernel-wide table of in-use inodes.
pub struct FileTable {
    nodes: Spinlock<Vec<Arc<Filenode>>>,
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            nodes: Spinlock::new("file table", Vec::new()),
        }
    }

    pub fn find(&self, sector: u32) -> Option<Arc<Filenode>> {
        self.nodes
            .lock()
            .iter()
            .find(|n| n.sector == sector)
            .map(Arc::clone)
    }

    pub fn find_or_add(&self, sector: u32, name: &str) -> Arc<Filenode> {
        let mut nodes = self.nodes.lock();
        if let Some(node) = nodes.iter().find(|n| n.sector == sector) {
            return Arc::clone(node);
        }
        let node = Arc::new(Filenode::new(sector, name));
        nodes.push(Arc::clone(&node));
        node
    }

    pub fn remove(&self, sector: u32) {
        self.nodes.lock().retain(|n| n.sector != sector);
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

/// One handle onto an open file.
pub struct OpenFile {
    sector: u32,
    node: Arc<Filenode>,
    pos: Spinlock<u32>,
}

impl OpenFile {
    pub(crate) fn new(sector: u32, node: Arc<Filenode>) -> Self {
        Self {
            sector,
            node,
            pos: Spinlock::new("open file pos", 0),
        }
    }

    /// Sector holding this file's header.
    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub fn node(&self) -> &Arc<Filenode> {
        &self.node
    }

    /// Bytes in the file right now.
    pub fn length(&self, ctx: &KernelCtx<'_>) -> u32 {
        FileHeader::fetch_from(ctx, self.sector).length()
    }

    pub fn seek(&self, position: u32) {
        *self.pos.lock() = position;
    }

    pub fn tell(&self) -> u32 {
        *self.pos.lock()
    }

    /// Read from the seek position, advancing it.
    pub fn read(&self, ctx: &KernelCtx<'_>, buf: &mut [u8]) -> usize {
        let position = self.tell();
        let done = self.read_at(ctx, buf, position);
        *self.pos.lock() = position + done as u32;
        done
    }

    /// Write at the seek position, advancing it.
    pub fn write(&self, ctx: &KernelCtx<'_>, buf: &[u8]) -> usize {
        let position = self.tell();
        let done = self.write_at(ctx, buf, position);
        *self.pos.lock() = position + done as u32;
        done
    }

    /// Read up to `buf.len()` bytes starting at `offset`. Short reads stop
    /// at end of file.
    pub fn read_at(&self, ctx: &KernelCtx<'_>, buf: &mut [u8], offset: u32) -> usize {
        let header = FileHeader::fetch_from(ctx, self.sector);
        let length = header.length();
        if offset >= length || buf.is_empty() {
            return 0;
        }
        let want = buf.len().min((length - offset) as usize);
        let disk = ctx.kernel().disk();
        let mut done = 0;
        while done < want {
            let at = offset as usize + done;
            let in_sector = at % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - in_sector).min(want - done);
            let sector = match header.byte_to_sector(ctx, at as u32) {
                Some(s) => s,
                None => break,
            };
            let mut tmp = [0; SECTOR_SIZE];
            disk.read_sector(ctx, sector, &mut tmp);
            buf[done..done + chunk].copy_from_slice(&tmp[in_sector..in_sector + chunk]);
            done += chunk;
        }
        done
    }

    /// Write `buf` starting at `offset`, growing the file when the write
    /// runs past the last allocated sector. Returns how many bytes landed;
    /// short writes mean the disk filled up.
    pub fn write_at(&self, ctx: &KernelCtx<'_>, buf: &[u8], offset: u32) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let fs = ctx.kernel().fs();
        let end = offset + buf.len() as u32;
        let mut header = FileHeader::fetch_from(ctx, self.sector);
        let capacity = header.num_sectors() * SECTOR_SIZE as u32;
        if end > capacity {
            if let Err(err) = fs.expand(ctx, self.sector, end - capacity) {
                log::debug!("write_at: cannot grow file: {}", err);
            }
            header = FileHeader::fetch_from(ctx, self.sector);
        }

        let capacity = header.num_sectors() * SECTOR_SIZE as u32;
        if offset >= capacity {
            return 0;
        }
        let want = buf.len().min((capacity - offset) as usize);
        let disk = ctx.kernel().disk();
        let mut done = 0;
        while done < want {
            let at = offset as usize + done;
            let in_sector = at % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - in_sector).min(want - done);
            let sector = match header.byte_to_sector(ctx, at as u32) {
                Some(s) => s,
                None => break,
            };
            if chunk == SECTOR_SIZE {
                let mut tmp = [0; SECTOR_SIZE];
                tmp.copy_from_slice(&buf[done..done + chunk]);
                disk.write_sector(ctx, sector, &tmp);
            } else {
                // Partial sector: read, patch, write back.
                let mut tmp = [0; SECTOR_SIZE];
                disk.read_sector(ctx, sector, &mut tmp);
                tmp[in_sector..in_sector + chunk].copy_from_slice(&buf[done..done + chunk]);
                disk.write_sector(ctx, sector, &tmp);
            }
            done += chunk;
        }

        let reached = offset + done as u32;
        if reached > header.length() {
            header.set_length(reached);
            header.write_back(ctx, self.sector);
        }
        done
    }
}
