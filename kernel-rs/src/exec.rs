//! Starting user programs: argv marshaling and process entry.
//!
//! `save_args` runs in the parent, copying the argv vector out of its
//! address space into kernel buffers. `write_args` runs in the child once
//! its own space is live: the strings go onto the new stack, the stack
//! pointer is aligned, a NUL-terminated pointer array goes above them, and
//! room is left for the register-save area — then argc/argv land in the
//! argument registers and the machine enters user mode.

use arrayvec::ArrayVec;
use itertools::izip;

use crate::{
    error::KernelError,
    param::{ARG1_REG, ARG2_REG, MAX_ARG_COUNT, MAX_ARG_LENGTH, STACK_REG},
    proc::{self, KernelCtx},
    syscall::transfer,
};

pub type Args = ArrayVec<String, MAX_ARG_COUNT>;

/// Copy an argv vector (a NUL-terminated array of string pointers) out of
/// the current address space. A vector with no terminator within
/// `MAX_ARG_COUNT` slots is an error.
pub fn save_args(ctx: &KernelCtx<'_>, address: u32) -> Result<Args, KernelError> {
    let mut args = Args::new();
    if address == 0 {
        return Ok(args);
    }
    for i in 0..MAX_ARG_COUNT as u32 {
        let pointer = transfer::read_mem(ctx, address + i * 4, 4)?;
        if pointer == 0 {
            log::debug!("saved {} command line arguments", args.len());
            return Ok(args);
        }
        let arg = transfer::read_string_from_guest(ctx, pointer, MAX_ARG_LENGTH)?;
        args.push(arg);
    }
    Err(KernelError::BadPath)
}

/// Lay the saved argv out on the current (child) stack. Returns the argc
/// and argv values for the program's argument registers.
pub fn write_args(ctx: &KernelCtx<'_>, args: &Args) -> Result<(u32, u32), KernelError> {
    let machine = ctx.kernel().machine();
    let mut sp = machine.read_register(STACK_REG);

    let mut addresses: ArrayVec<u32, MAX_ARG_COUNT> = ArrayVec::new();
    for arg in args.iter() {
        sp -= arg.len() as u32 + 1;
        transfer::write_string_to_guest(ctx, arg, sp)?;
        addresses.push(sp);
    }
    let argc = args.len() as u32;

    sp -= sp % 4; // Word-align the pointer array.
    sp -= argc * 4 + 4; // The array plus its trailing NUL.
    let argv = sp;
    for (slot, address) in izip!(0..argc, addresses.iter()) {
        transfer::write_mem(ctx, argv + slot * 4, 4, *address)?;
    }
    transfer::write_mem(ctx, argv + argc * 4, 4, 0)?;

    sp -= 16; // Room for the register saves.
    machine.write_register(STACK_REG, sp);
    log::debug!("argv written: argc={} argv={:#x} sp={:#x}", argc, argv, sp);
    Ok((argc, argv))
}

/// Body of a freshly Exec'd process: set up registers and stack, then hand
/// control to the machine. Never returns.
pub fn run_program(ctx: &KernelCtx<'_>, args: Args) -> ! {
    let space = ctx
        .thread()
        .space()
        .expect("run_program: thread has no address space");
    space.init_registers(ctx);
    space.restore_state(ctx.kernel().machine());

    let status = match write_args(ctx, &args) {
        Ok((argc, argv)) => {
            let machine = ctx.kernel().machine();
            machine.write_register(ARG1_REG, argc);
            machine.write_register(ARG2_REG, argv);
            machine.run(ctx);
            0
        }
        Err(err) => {
            log::warn!("run_program: argv setup failed: {}", err);
            -1
        }
    };
    proc::exit(ctx, status)
}
