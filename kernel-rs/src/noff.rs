//! NOFF executables.
//!
//! The object format user programs are linked into: a magic word and three
//! segments (code, initialized data, uninitialized data), each described by
//! its virtual address, its position in the file, and its size. The kernel
//! only sizes address spaces from it and re-reads clean pages out of the
//! code and data segments on demand.

use core::mem;

use zerocopy::{AsBytes, FromBytes};

use crate::{error::KernelError, file::OpenFile, proc::KernelCtx};

pub const NOFF_MAGIC: u32 = 0xbadfad;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes)]
pub struct NoffSegment {
    /// Location of the segment in user virtual memory.
    pub virtual_addr: u32,
    /// Location of the segment in the executable file.
    pub in_file_addr: u32,
    pub size: u32,
}

impl NoffSegment {
    /// Does the segment cover `vaddr`?
    pub fn contains(&self, vaddr: u32) -> bool {
        self.size > 0 && self.virtual_addr <= vaddr && vaddr < self.virtual_addr + self.size
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes)]
pub struct NoffHeader {
    pub magic: u32,
    pub code: NoffSegment,
    pub init_data: NoffSegment,
    pub uninit_data: NoffSegment,
}

pub const NOFF_HEADER_SIZE: usize = mem::size_of::<NoffHeader>();

impl NoffHeader {
    pub fn is_valid(&self) -> bool {
        self.magic == NOFF_MAGIC
    }

    /// Read and validate the header at the front of an executable.
    pub fn read_from(ctx: &KernelCtx<'_>, exe: &OpenFile) -> Result<Self, KernelError> {
        let mut header = NoffHeader::new_zeroed();
        let read = exe.read_at(ctx, header.as_bytes_mut(), 0);
        if read != NOFF_HEADER_SIZE || !header.is_valid() {
            return Err(KernelError::BadPath);
        }
        Ok(header)
    }

    /// Bytes of user memory the program needs, stack excluded.
    pub fn memory_size(&self) -> usize {
        (self.code.size + self.init_data.size + self.uninit_data.size) as usize
    }
}
