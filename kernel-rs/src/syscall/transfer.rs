//! Moving bytes across the user/kernel boundary.
//!
//! Guest memory is only reachable through the machine's TLB, so every
//! access can fault. The helpers here go one access at a time and service
//! page faults in place, retrying until the byte goes through. Anything
//! else wrong with the address surfaces as an error for the system call to
//! turn into a failure result.

use crate::{
    error::KernelError,
    machine::Exception,
    proc::KernelCtx,
    vm,
};

/// Read one 1/2/4-byte item from guest memory, faulting pages in.
pub fn read_mem(ctx: &KernelCtx<'_>, vaddr: u32, size: usize) -> Result<u32, KernelError> {
    loop {
        match ctx.kernel().machine().read_mem(vaddr, size) {
            Ok(value) => return Ok(value),
            Err(Exception::PageFault(addr)) => vm::handle_page_fault(ctx, addr)?,
            Err(_) => return Err(KernelError::BadPath),
        }
    }
}

/// Write one 1/2/4-byte item into guest memory, faulting pages in.
pub fn write_mem(ctx: &KernelCtx<'_>, vaddr: u32, size: usize, value: u32) -> Result<(), KernelError> {
    loop {
        match ctx.kernel().machine().write_mem(vaddr, size, value) {
            Ok(()) => return Ok(()),
            Err(Exception::PageFault(addr)) => vm::handle_page_fault(ctx, addr)?,
            Err(_) => return Err(KernelError::BadPath),
        }
    }
}

/// Copy a NUL-terminated string out of guest memory. Fails when there is
/// no terminator within `max_len` bytes, or the string is not UTF-8.
pub fn read_string_from_guest(
    ctx: &KernelCtx<'_>,
    mut vaddr: u32,
    max_len: usize,
) -> Result<String, KernelError> {
    if vaddr == 0 {
        return Err(KernelError::BadPath);
    }
    let mut bytes = Vec::new();
    loop {
        let byte = read_mem(ctx, vaddr, 1)? as u8;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
        if bytes.len() >= max_len {
            return Err(KernelError::BadPath);
        }
        vaddr += 1;
    }
    String::from_utf8(bytes).map_err(|_| KernelError::BadPath)
}

/// Copy a byte buffer out of guest memory.
pub fn read_buffer_from_guest(
    ctx: &KernelCtx<'_>,
    vaddr: u32,
    len: usize,
) -> Result<Vec<u8>, KernelError> {
    let mut buffer = Vec::with_capacity(len);
    for i in 0..len {
        buffer.push(read_mem(ctx, vaddr + i as u32, 1)? as u8);
    }
    Ok(buffer)
}

/// Copy a byte buffer into guest memory.
pub fn write_buffer_to_guest(
    ctx: &KernelCtx<'_>,
    vaddr: u32,
    bytes: &[u8],
) -> Result<(), KernelError> {
    for (i, byte) in bytes.iter().enumerate() {
        write_mem(ctx, vaddr + i as u32, 1, u32::from(*byte))?;
    }
    Ok(())
}

/// Copy a string plus its NUL terminator into guest memory.
pub fn write_string_to_guest(
    ctx: &KernelCtx<'_>,
    string: &str,
    vaddr: u32,
) -> Result<(), KernelError> {
    write_buffer_to_guest(ctx, vaddr, string.as_bytes())?;
    write_mem(ctx, vaddr + string.len() as u32, 1, 0)
}
