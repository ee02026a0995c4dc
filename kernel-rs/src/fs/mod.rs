//! File system.
//!
//! Layers, bottom up:
//! * sector cache and synchronous disk (`bio`),
//! * free-sector bitmap, kept in an ordinary file (`bitmap`),
//! * file headers mapping bytes to sectors (`inode`),
//! * directories, kept in ordinary files (`directory`),
//! * this facade: names, create/open/remove, and the consistency check.
//!
//! The bitmap file's header lives in sector 0 and the root directory's in
//! sector 1, so everything is reachable from a freshly mounted disk. Both
//! files stay open for the kernel's whole life.
//!
//! Operations that mutate the directory and bitmap write both back only
//! once the whole operation has succeeded. On failure the in-memory copies
//! are simply discarded, which leaves the on-disk structures exactly as
//! they were.
//!
//! Removing an open file is deferred: the file table node is marked and the
//! sectors go back to the bitmap when the last user closes the file.

use std::sync::Arc;

use spin::Once;

use crate::{
    error::KernelError,
    file::OpenFile,
    param::{DIRECTORY_SECTOR, FREE_MAP_SECTOR, MAX_FILE_SECTORS, NUM_DIR_ENTRIES, NUM_SECTORS,
        SECTOR_SIZE},
    proc::KernelCtx,
};

mod bitmap;
mod directory;
mod inode;
mod path;

pub use self::bitmap::Bitmap;
pub use self::directory::{Directory, RawDirectoryEntry, DIR_ENTRY_SIZE, DIR_TABLE_OFFSET};
pub use self::inode::{FileHeader, RawFileHeader};
pub use self::path::{FileName, Path};

/// Bytes in the free-map file: one bit per sector.
pub const FREE_MAP_FILE_SIZE: u32 = (NUM_SECTORS / 8) as u32;

struct FsFiles {
    free_map: Arc<OpenFile>,
    root_dir: Arc<OpenFile>,
}

pub struct FileSystem {
    files: Once<FsFiles>,
    format_on_boot: bool,
}

impl FileSystem {
    pub fn new(format_on_boot: bool) -> Self {
        Self {
            files: Once::new(),
            format_on_boot,
        }
    }

    /// Mount the file system: format the disk when asked to, then open the
    /// bitmap and root directory files. Runs once.
    pub fn init(&self, ctx: &KernelCtx<'_>) {
        if self.files.is_completed() {
            return;
        }
        self.files.call_once(|| {
            if self.format_on_boot {
                self.format(ctx);
            }
            FsFiles {
                free_map: self.open_sector(ctx, FREE_MAP_SECTOR),
                root_dir: self.open_sector(ctx, DIRECTORY_SECTOR),
            }
        });
    }

    fn format(&self, ctx: &KernelCtx<'_>) {
        log::debug!("formatting the file system");
        let mut free_map = Bitmap::new(NUM_SECTORS);
        // The two well-known header sectors go first, before anyone else
        // can grab them.
        free_map.mark(FREE_MAP_SECTOR);
        free_map.mark(DIRECTORY_SECTOR);

        let mut map_header = FileHeader::new();
        let mut dir_header = FileHeader::new();
        assert!(
            map_header.allocate(ctx, &mut free_map, FREE_MAP_FILE_SIZE),
            "format: no room for the free map"
        );
        assert!(
            dir_header.allocate(
                ctx,
                &mut free_map,
                Directory::file_size(NUM_DIR_ENTRIES)
            ),
            "format: no room for the root directory"
        );

        // Headers must be on disk before the files can be opened.
        map_header.write_back(ctx, FREE_MAP_SECTOR);
        dir_header.write_back(ctx, DIRECTORY_SECTOR);

        let free_map_file = self.open_sector(ctx, FREE_MAP_SECTOR);
        let root_dir_file = self.open_sector(ctx, DIRECTORY_SECTOR);
        free_map
            .write_back(ctx, &free_map_file)
            .expect("format: free map write");
        Directory::new(NUM_DIR_ENTRIES).write_back(ctx, &root_dir_file);
    }

    fn files(&self) -> &FsFiles {
        self.files.get().expect("file system not initialized")
    }

    /// Open the file whose header sits in `sector`, without touching user
    /// counts. For kernel-internal structures: the bitmap, directories.
    pub(crate) fn open_sector(&self, ctx: &KernelCtx<'_>, sector: u32) -> Arc<OpenFile> {
        let node = ctx.kernel().filetable().find_or_add(sector, "internal");
        Arc::new(OpenFile::new(sector, node))
    }

    /// The current on-disk free map. Callers get their own copy; mutating
    /// it changes nothing until somebody writes it back.
    pub fn free_map(&self, ctx: &KernelCtx<'_>) -> Result<Bitmap, KernelError> {
        let mut free_map = Bitmap::new(NUM_SECTORS);
        free_map.fetch_from(ctx, &self.files().free_map)?;
        Ok(free_map)
    }

    /// Walk every directory component but the last, starting at the root.
    /// Returns the sector of the parent directory's header.
    fn resolve_parent(&self, ctx: &KernelCtx<'_>, path: &Path<'_>) -> Result<u32, KernelError> {
        let mut sector = DIRECTORY_SECTOR;
        for component in path.parent_components()? {
            let file = self.open_sector(ctx, sector);
            let dir = Directory::fetch_from(ctx, &file);
            sector = dir
                .find(&component, true)
                .ok_or(KernelError::NotFound)?;
        }
        Ok(sector)
    }

    /// Create a file of `initial_size` bytes.
    pub fn create(&self, ctx: &KernelCtx<'_>, path: &str, initial_size: u32) -> Result<(), KernelError> {
        let parsed = Path::new(path)?;
        let name = parsed.file_name()?;
        let parent_sector = self.resolve_parent(ctx, &parsed)?;
        log::debug!("create {} ({} bytes)", path, initial_size);

        let parent_node = ctx.kernel().filetable().find_or_add(parent_sector, "dir");
        parent_node.dir_lock().acquire(ctx);
        let _release = scopeguard::guard((), |_| parent_node.dir_lock().release(ctx));

        let parent_file = self.open_sector(ctx, parent_sector);
        let mut dir = Directory::fetch_from(ctx, &parent_file);
        if dir.find(&name, false).is_some() || dir.find(&name, true).is_some() {
            return Err(KernelError::AlreadyExists);
        }

        let mut free_map = self.free_map(ctx)?;
        let sector = free_map.find().ok_or(KernelError::NoSpace)?;
        let mut header = FileHeader::new();
        if !header.allocate(ctx, &mut free_map, initial_size) {
            // The bitmap copy dies here, so nothing was really taken.
            return Err(KernelError::NoSpace);
        }
        if !dir.add(&name, sector, false) {
            return Err(KernelError::AlreadyExists);
        }

        // Everything worked; flush all three structures.
        header.write_back(ctx, sector);
        free_map.write_back(ctx, &self.files().free_map)?;
        dir.write_back(ctx, &parent_file);
        Ok(())
    }

    /// Open a file for reading and writing.
    pub fn open(&self, ctx: &KernelCtx<'_>, path: &str) -> Result<Arc<OpenFile>, KernelError> {
        let parsed = Path::new(path)?;
        let name = parsed.file_name()?;
        let parent_sector = self.resolve_parent(ctx, &parsed)?;

        let parent_node = ctx.kernel().filetable().find_or_add(parent_sector, "dir");
        parent_node.dir_lock().acquire(ctx);
        let _release = scopeguard::guard((), |_| parent_node.dir_lock().release(ctx));

        let parent_file = self.open_sector(ctx, parent_sector);
        let dir = Directory::fetch_from(ctx, &parent_file);
        let sector = dir.find(&name, false).ok_or(KernelError::NotFound)?;

        let node = ctx.kernel().filetable().find_or_add(sector, path);
        if node.marked_for_delete() {
            // Somebody removed the file; it is on its way out.
            return Err(KernelError::Busy);
        }
        node.set_name(path);
        node.add_user();
        log::debug!("open {} (sector {})", path, sector);
        Ok(Arc::new(OpenFile::new(sector, node)))
    }

    /// Drop one handle. The last close of a file marked for deletion
    /// finishes the removal.
    pub fn close(&self, ctx: &KernelCtx<'_>, file: &Arc<OpenFile>) {
        let node = Arc::clone(file.node());
        if node.drop_user() > 0 {
            return;
        }
        let deferred = node.marked_for_delete();
        ctx.kernel().filetable().remove(node.sector());
        if deferred {
            self.finish_deferred_remove(ctx, &node);
        }
    }

    /// Complete a removal that `remove` deferred while the file was open.
    /// The directory entry may already be gone (a recursive clean dropped
    /// it); only the sectors are unconditionally reclaimed.
    fn finish_deferred_remove(&self, ctx: &KernelCtx<'_>, node: &crate::file::Filenode) {
        let path = node.name();
        log::debug!("deferred remove of {} (sector {})", path, node.sector());
        if let Ok(parsed) = Path::new(&path) {
            if let (Ok(name), Ok(parent_sector)) =
                (parsed.file_name(), self.resolve_parent(ctx, &parsed))
            {
                let parent_node = ctx.kernel().filetable().find_or_add(parent_sector, "dir");
                parent_node.dir_lock().acquire(ctx);
                let parent_file = self.open_sector(ctx, parent_sector);
                let mut dir = Directory::fetch_from(ctx, &parent_file);
                if dir.find(&name, false) == Some(node.sector()) {
                    dir.remove(&name);
                    dir.write_back(ctx, &parent_file);
                }
                parent_node.dir_lock().release(ctx);
            }
        }
        if let Ok(mut free_map) = self.free_map(ctx) {
            let mut header = FileHeader::fetch_from(ctx, node.sector());
            header.deallocate(ctx, &mut free_map);
            free_map.clear(node.sector());
            let _ = free_map.write_back(ctx, &self.files().free_map);
        }
    }

    /// Delete a file. When somebody still has it open the deletion is
    /// deferred: the call succeeds, later opens fail, and the sectors are
    /// reclaimed at the last close.
    pub fn remove(&self, ctx: &KernelCtx<'_>, path: &str) -> Result<(), KernelError> {
        let parsed = Path::new(path)?;
        let name = parsed.file_name()?;
        let parent_sector = self.resolve_parent(ctx, &parsed)?;

        let parent_node = ctx.kernel().filetable().find_or_add(parent_sector, "dir");
        parent_node.dir_lock().acquire(ctx);
        let _release = scopeguard::guard((), |_| parent_node.dir_lock().release(ctx));

        let parent_file = self.open_sector(ctx, parent_sector);
        let mut dir = Directory::fetch_from(ctx, &parent_file);
        let sector = dir.find(&name, false).ok_or(KernelError::NotFound)?;

        if let Some(node) = ctx.kernel().filetable().find(sector) {
            if node.users() > 0 {
                log::debug!("remove {}: open by {} users, deferring", path, node.users());
                node.set_name(path);
                node.mark_for_delete();
                return Ok(());
            }
        }

        let mut free_map = self.free_map(ctx)?;
        let mut header = FileHeader::fetch_from(ctx, sector);
        header.deallocate(ctx, &mut free_map); // Data blocks.
        free_map.clear(sector); // Header block.
        dir.remove(&name);
        free_map.write_back(ctx, &self.files().free_map)?;
        dir.write_back(ctx, &parent_file);
        ctx.kernel().filetable().remove(sector);
        log::debug!("removed {}", path);
        Ok(())
    }

    /// Create a directory.
    pub fn make_dir(&self, ctx: &KernelCtx<'_>, path: &str) -> Result<(), KernelError> {
        let parsed = Path::new(path)?;
        let name = parsed.file_name()?;
        let parent_sector = self.resolve_parent(ctx, &parsed)?;
        log::debug!("mkdir {}", path);

        let parent_node = ctx.kernel().filetable().find_or_add(parent_sector, "dir");
        parent_node.dir_lock().acquire(ctx);
        let _release = scopeguard::guard((), |_| parent_node.dir_lock().release(ctx));

        let parent_file = self.open_sector(ctx, parent_sector);
        let mut dir = Directory::fetch_from(ctx, &parent_file);
        if dir.find(&name, false).is_some() || dir.find(&name, true).is_some() {
            return Err(KernelError::AlreadyExists);
        }

        let mut free_map = self.free_map(ctx)?;
        let sector = free_map.find().ok_or(KernelError::NoSpace)?;
        let mut header = FileHeader::new();
        if !header.allocate(
            ctx,
            &mut free_map,
            Directory::file_size(NUM_DIR_ENTRIES),
        ) {
            return Err(KernelError::NoSpace);
        }
        if !dir.add(&name, sector, true) {
            return Err(KernelError::AlreadyExists);
        }

        header.write_back(ctx, sector);
        // The bitmap must land before anything writes through the new
        // file, or a growth path would allocate against a stale map.
        free_map.write_back(ctx, &self.files().free_map)?;
        let new_file = self.open_sector(ctx, sector);
        Directory::new(NUM_DIR_ENTRIES).write_back(ctx, &new_file);
        dir.write_back(ctx, &parent_file);
        Ok(())
    }

    /// Delete a directory and everything under it. The root itself cannot
    /// be removed.
    pub fn remove_dir(&self, ctx: &KernelCtx<'_>, path: &str) -> Result<(), KernelError> {
        let parsed = Path::new(path)?;
        if parsed.is_root() {
            return Err(KernelError::BadPath);
        }
        let name = parsed.file_name()?;
        let parent_sector = self.resolve_parent(ctx, &parsed)?;
        log::debug!("rmdir {}", path);

        let parent_node = ctx.kernel().filetable().find_or_add(parent_sector, "dir");
        parent_node.dir_lock().acquire(ctx);
        let _release = scopeguard::guard((), |_| parent_node.dir_lock().release(ctx));

        let parent_file = self.open_sector(ctx, parent_sector);
        let mut dir = Directory::fetch_from(ctx, &parent_file);
        let dir_sector = dir.find(&name, true).ok_or(KernelError::NotFound)?;

        let mut free_map = self.free_map(ctx)?;

        let child_node = ctx.kernel().filetable().find_or_add(dir_sector, path);
        child_node.dir_lock().acquire(ctx);
        let child_file = self.open_sector(ctx, dir_sector);
        let mut child = Directory::fetch_from(ctx, &child_file);
        child.clean(ctx, &mut free_map);
        child_node.dir_lock().release(ctx);

        let mut header = FileHeader::fetch_from(ctx, dir_sector);
        header.deallocate(ctx, &mut free_map);
        free_map.clear(dir_sector);
        dir.remove(&name);
        free_map.write_back(ctx, &self.files().free_map)?;
        dir.write_back(ctx, &parent_file);
        ctx.kernel().filetable().remove(dir_sector);
        Ok(())
    }

    /// Grow the file whose header is in `sector` by `extra_bytes`,
    /// persisting the bitmap only when the whole growth fits.
    pub fn expand(&self, ctx: &KernelCtx<'_>, sector: u32, extra_bytes: u32) -> Result<(), KernelError> {
        let mut free_map = self.free_map(ctx)?;
        let mut header = FileHeader::fetch_from(ctx, sector);
        if header.extend(ctx, &mut free_map, extra_bytes) {
            free_map.write_back(ctx, &self.files().free_map)?;
            Ok(())
        } else {
            Err(KernelError::NoSpace)
        }
    }

    /// Consistency check: rebuild the bitmap by walking everything
    /// reachable from the two well-known sectors and compare it against
    /// the on-disk map. Reports directory anomalies on the way. True means
    /// the disk is consistent.
    pub fn check(&self, ctx: &KernelCtx<'_>) -> bool {
        log::debug!("performing file system check");
        let mut shadow = Bitmap::new(NUM_SECTORS);
        let mut error = false;
        shadow.mark(FREE_MAP_SECTOR);
        shadow.mark(DIRECTORY_SECTOR);

        let map_header = FileHeader::fetch_from(ctx, FREE_MAP_SECTOR);
        error |= check_for_error(
            map_header.length() == FREE_MAP_FILE_SIZE,
            "bad bitmap header: wrong file size",
        );
        error |= check_file_header(ctx, &map_header, &mut shadow);

        let dir_header = FileHeader::fetch_from(ctx, DIRECTORY_SECTOR);
        error |= check_file_header(ctx, &dir_header, &mut shadow);
        error |= self.check_directory(ctx, DIRECTORY_SECTOR, &mut shadow);

        match self.free_map(ctx) {
            Ok(free_map) => {
                for sector in 0..NUM_SECTORS as u32 {
                    error |= check_for_error(
                        free_map.test(sector) == shadow.test(sector),
                        "inconsistent bitmap",
                    );
                }
            }
            Err(_) => error = true,
        }
        if error {
            log::warn!("file system check failed");
        }
        !error
    }

    fn check_directory(&self, ctx: &KernelCtx<'_>, sector: u32, shadow: &mut Bitmap) -> bool {
        let mut error = false;
        let file = self.open_sector(ctx, sector);
        let dir = Directory::fetch_from(ctx, &file);

        let mut seen: Vec<(FileName, bool)> = Vec::new();
        for entry in dir.entries() {
            let name = entry.name();
            error |= check_for_error(
                !seen.iter().any(|(n, d)| *n == name && *d == entry.is_dir()),
                "repeated name in directory",
            );
            seen.push((name, entry.is_dir()));

            error |= check_sector(entry.sector(), shadow);
            let header = FileHeader::fetch_from(ctx, entry.sector());
            error |= check_file_header(ctx, &header, shadow);
            if entry.is_dir() {
                error |= self.check_directory(ctx, entry.sector(), shadow);
            }
        }
        error
    }
}

fn check_for_error(ok: bool, message: &str) -> bool {
    if !ok {
        log::warn!("fsck: {}", message);
    }
    !ok
}

/// A sector referenced by live metadata: must be on the disk and must not
/// be claimed twice.
fn check_sector(sector: u32, shadow: &mut Bitmap) -> bool {
    let mut error = check_for_error((sector as usize) < NUM_SECTORS, "sector number too big");
    if !error {
        error |= check_for_error(!shadow.test(sector), "sector number already used");
        if !shadow.test(sector) {
            shadow.mark(sector);
        }
    }
    error
}

fn check_file_header(ctx: &KernelCtx<'_>, header: &FileHeader, shadow: &mut Bitmap) -> bool {
    let raw = header.raw();
    let mut error = check_for_error(
        raw.num_sectors as usize >= crate::param::div_round_up(raw.num_bytes as usize, SECTOR_SIZE),
        "sector count not compatible with file size",
    );
    error |= check_for_error(
        raw.num_sectors as usize <= MAX_FILE_SECTORS,
        "too many blocks",
    );
    for sector in header.reachable_sectors(ctx) {
        error |= check_sector(sector, shadow);
    }
    error
}
