//! Shared fixtures: booting a kernel, planting NOFF executables, and
//! raising system calls the way the machine would.

#![allow(dead_code)]

use std::sync::Arc;

use zerocopy::AsBytes;

use kernel::{
    kernel::Kernel,
    machine::{Exception, MachineParams},
    noff::{NoffHeader, NoffSegment, NOFF_HEADER_SIZE, NOFF_MAGIC},
    param::{ARG1_REG, ARG2_REG, ARG3_REG, RET_REG},
    proc::KernelCtx,
    trap,
    vm::AddressSpace,
};

pub fn boot() -> Arc<Kernel> {
    Kernel::boot(MachineParams::default())
}

pub fn boot_with_pages(num_phys_pages: usize) -> Arc<Kernel> {
    Kernel::boot(MachineParams {
        num_phys_pages,
        format: true,
    })
}

/// Write a NOFF executable into the file system: header, then the code
/// and initialized-data images packed right behind it.
pub fn install_noff(
    ctx: &KernelCtx<'_>,
    path: &str,
    code: &[u8],
    init_data: &[u8],
    uninit_size: u32,
) {
    let header = NoffHeader {
        magic: NOFF_MAGIC,
        code: NoffSegment {
            virtual_addr: 0,
            in_file_addr: NOFF_HEADER_SIZE as u32,
            size: code.len() as u32,
        },
        init_data: NoffSegment {
            virtual_addr: code.len() as u32,
            in_file_addr: (NOFF_HEADER_SIZE + code.len()) as u32,
            size: init_data.len() as u32,
        },
        uninit_data: NoffSegment {
            virtual_addr: (code.len() + init_data.len()) as u32,
            in_file_addr: 0,
            size: uninit_size,
        },
    };

    let fs = ctx.kernel().fs();
    let _ = fs.remove(ctx, path);
    fs.create(ctx, path, 0).expect("create executable");
    let exe = fs.open(ctx, path).expect("open executable");
    assert_eq!(
        exe.write_at(ctx, header.as_bytes(), 0),
        NOFF_HEADER_SIZE,
        "short header write"
    );
    if !code.is_empty() {
        exe.write_at(ctx, code, NOFF_HEADER_SIZE as u32);
    }
    if !init_data.is_empty() {
        exe.write_at(ctx, init_data, (NOFF_HEADER_SIZE + code.len()) as u32);
    }
    fs.close(ctx, &exe);
}

/// Build an address space for `path` and attach it to the current thread,
/// ready for guest-memory traffic.
pub fn attach_space(ctx: &KernelCtx<'_>, path: &str) -> Arc<AddressSpace> {
    let exe = ctx.kernel().fs().open(ctx, path).expect("open executable");
    let space = AddressSpace::new(ctx, exe).expect("build address space");
    ctx.thread().set_space(Arc::clone(&space));
    space.init_registers(ctx);
    space.restore_state(ctx.kernel().machine());
    space
}

/// Raise a system call exactly like the machine: id in r2, arguments in
/// r4..r6, result read back from r2.
pub fn syscall(ctx: &KernelCtx<'_>, id: u32, args: [u32; 3]) -> i32 {
    let machine = ctx.kernel().machine();
    machine.write_register(RET_REG, id);
    machine.write_register(ARG1_REG, args[0]);
    machine.write_register(ARG2_REG, args[1]);
    machine.write_register(ARG3_REG, args[2]);
    trap::handle_exception(ctx, Exception::Syscall);
    machine.read_register(RET_REG) as i32
}
