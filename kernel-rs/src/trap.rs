//! Exception entry points.
//!
//! Control comes back from user mode for two reasons: the program asked
//! for a kernel service, or the machine could not finish a memory access.
//! System calls and page faults have real handlers; everything else is a
//! guest bug the kernel does not try to survive.

use crate::{machine::Exception, proc::KernelCtx, syscall, vm};

pub fn handle_exception(ctx: &KernelCtx<'_>, exception: Exception) {
    match exception {
        Exception::Syscall => syscall::syscall(ctx),
        Exception::PageFault(vaddr) => {
            if let Err(err) = vm::handle_page_fault(ctx, vaddr) {
                panic!("unhandled page fault at {:#x}: {}", vaddr, err);
            }
        }
        Exception::ReadOnly(vaddr) => {
            panic!("write to read-only address {:#x}", vaddr);
        }
        Exception::AddressError(vaddr) => {
            panic!("unserviceable address {:#x}", vaddr);
        }
    }
}
