//! System call dispatch.
//!
//! The calling convention: the identifier arrives in r2, up to four
//! arguments in r4..r7, and the result goes back into r2. The program
//! counter is advanced past the syscall instruction before returning to
//! user mode — forgetting that would re-run the same call forever.

use crate::{
    param::{ARG1_REG, ARG2_REG, ARG3_REG, NEXT_PC_REG, PC_REG, PREV_PC_REG, RET_REG},
    proc::KernelCtx,
};

mod file;
mod proc;
pub mod transfer;

pub const SC_HALT: u32 = 0;
pub const SC_EXIT: u32 = 1;
pub const SC_EXEC: u32 = 2;
pub const SC_JOIN: u32 = 3;
pub const SC_CREATE: u32 = 4;
pub const SC_OPEN: u32 = 5;
pub const SC_READ: u32 = 6;
pub const SC_WRITE: u32 = 7;
pub const SC_CLOSE: u32 = 8;
pub const SC_FORK: u32 = 9;
pub const SC_YIELD: u32 = 10;
pub const SC_REMOVE: u32 = 11;

/// Advance PC past the executed syscall instruction.
fn increment_pc(ctx: &KernelCtx<'_>) {
    let machine = ctx.kernel().machine();
    let pc = machine.read_register(PC_REG);
    machine.write_register(PREV_PC_REG, pc);
    let pc = machine.read_register(NEXT_PC_REG);
    machine.write_register(PC_REG, pc);
    machine.write_register(NEXT_PC_REG, pc + 4);
}

/// Handle the system call the current thread just raised.
pub fn syscall(ctx: &KernelCtx<'_>) {
    let machine = ctx.kernel().machine();
    let id = machine.read_register(RET_REG);
    let arg1 = machine.read_register(ARG1_REG);
    let arg2 = machine.read_register(ARG2_REG);
    let arg3 = machine.read_register(ARG3_REG);

    let result = match id {
        SC_HALT => {
            log::debug!("syscall Halt: shutdown initiated by user program");
            ctx.kernel().halt(ctx);
            0
        }
        SC_EXIT => {
            // Never returns; PC no longer matters.
            crate::proc::exit(ctx, arg1 as i32)
        }
        SC_EXEC => proc::sys_exec(ctx, arg1, arg2, arg3),
        SC_JOIN => proc::sys_join(ctx, arg1),
        SC_CREATE => file::sys_create(ctx, arg1),
        SC_OPEN => file::sys_open(ctx, arg1),
        SC_READ => file::sys_read(ctx, arg1, arg2, arg3 as i32),
        SC_WRITE => file::sys_write(ctx, arg1, arg2, arg3 as i32),
        SC_CLOSE => file::sys_close(ctx, arg1 as i32),
        SC_REMOVE => file::sys_remove(ctx, arg1),
        SC_YIELD => {
            ctx.kernel().scheduler().yield_now(ctx);
            0
        }
        SC_FORK => {
            log::warn!("syscall Fork is not supported");
            -1
        }
        _ => panic!("unexpected system call: id {}", id),
    };
    machine.write_register(RET_REG, result as u32);
    increment_pc(ctx);
}
