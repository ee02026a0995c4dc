/// Bytes per disk sector.
pub const SECTOR_SIZE: usize = 128;

/// Sectors on the simulated disk (32 tracks of 32 sectors).
pub const NUM_SECTORS: usize = 1024;

/// Sector holding the file header of the free-sector bitmap.
pub const FREE_MAP_SECTOR: u32 = 0;

/// Sector holding the file header of the root directory.
pub const DIRECTORY_SECTOR: u32 = 1;

/// Direct sector slots in a file header. The header reserves four words of
/// metadata and fills the rest of its sector with the direct table.
pub const NUM_DIRECT: usize = (SECTOR_SIZE - 4 * 4) / 4;

/// Sector numbers held by one indirect block.
pub const NUM_INDIRECT: usize = SECTOR_SIZE / 4;

/// Largest file the two-level map can address, in sectors.
pub const MAX_FILE_SECTORS: usize = NUM_DIRECT + NUM_INDIRECT * NUM_INDIRECT;

/// Sentinel for "no sector assigned".
pub const NOT_ASSIGNED: u32 = u32::MAX;

/// Sectors held by the write-back sector cache.
pub const CACHE_SIZE: usize = 64;

/// Bytes in a directory entry name.
pub const FILE_NAME_MAX_LEN: usize = 9;

/// Longest accepted path string.
pub const PATH_MAX_LEN: usize = 128;

/// Entries in a freshly created directory. The table grows on demand.
pub const NUM_DIR_ENTRIES: usize = 1;

/// Entries added when a full directory table grows.
pub const DIR_EXPAND_BY: usize = 2;

/// Bytes per virtual/physical page. One page is one disk sector, so pages
/// move to and from the swap file a sector at a time.
pub const PAGE_SIZE: usize = SECTOR_SIZE;

/// Physical page frames unless the machine is built with another geometry.
pub const DEFAULT_NUM_PHYS_PAGES: usize = 32;

/// Software TLB slots.
pub const TLB_SIZE: usize = 4;

/// Bytes reserved for a user program's stack.
pub const USER_STACK_SIZE: usize = 1024;

/// Open files per thread, not counting the console handles.
pub const MAX_OPEN_FILES: usize = 16;

/// Exec argv vector bound.
pub const MAX_ARG_COUNT: usize = 32;

/// Exec argv string bound, terminator included.
pub const MAX_ARG_LENGTH: usize = 128;

/// Process identifiers wrap after this many.
pub const MAX_PROCESSES: usize = 4096;

/// Machine registers, including the pseudo-registers after r31.
pub const NUM_TOTAL_REGS: usize = 40;

/// Register carrying the system call identifier and its result.
pub const RET_REG: usize = 2;

/// The four argument registers r4..r7.
pub const ARG1_REG: usize = 4;
pub const ARG2_REG: usize = 5;
pub const ARG3_REG: usize = 6;
pub const ARG4_REG: usize = 7;

/// User stack pointer.
pub const STACK_REG: usize = 29;

/// Current, next and previous program counters.
pub const PC_REG: usize = 34;
pub const NEXT_PC_REG: usize = 35;
pub const PREV_PC_REG: usize = 36;

/// Faulting virtual address, set by the MMU when a translation fails.
pub const BAD_VADDR_REG: usize = 39;

/// Read/Write handle naming console input.
pub const CONSOLE_INPUT: i32 = 0;

/// Read/Write handle naming console output.
pub const CONSOLE_OUTPUT: i32 = 1;

/// Round `n` up to whole `unit`s.
pub const fn div_round_up(n: usize, unit: usize) -> usize {
    (n + unit - 1) / unit
}
