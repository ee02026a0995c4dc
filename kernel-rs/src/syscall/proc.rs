//! Process system calls: Exec and Join. Exit lives in `crate::proc`.

use crate::{
    exec,
    param::PATH_MAX_LEN,
    proc::{KernelCtx, Thread},
    syscall::transfer,
    vm::AddressSpace,
};

/// Start a program in its own address space. The argv vector is copied out
/// of the parent here; the child lays it out on its own stack when it
/// first runs. Returns the child's process id, or -1.
pub(super) fn sys_exec(ctx: &KernelCtx<'_>, path_addr: u32, argv_addr: u32, joinable: u32) -> i32 {
    let path = match transfer::read_string_from_guest(ctx, path_addr, PATH_MAX_LEN) {
        Ok(path) => path,
        Err(_) => return -1,
    };
    log::debug!("syscall Exec({:?}, joinable={})", path, joinable != 0);
    let args = match exec::save_args(ctx, argv_addr) {
        Ok(args) => args,
        Err(_) => return -1,
    };
    let exe = match ctx.kernel().fs().open(ctx, &path) {
        Ok(exe) => exe,
        Err(err) => {
            log::debug!("Exec: cannot open {:?}: {}", path, err);
            return -1;
        }
    };
    let space = match AddressSpace::new(ctx, exe) {
        Ok(space) => space,
        Err(err) => {
            log::debug!("Exec: cannot build address space for {:?}: {}", path, err);
            return -1;
        }
    };

    let child = Thread::fork(
        ctx.kernel_arc(),
        &path,
        ctx.thread().priority(),
        joinable != 0,
        Some(space),
        move |child_ctx| exec::run_program(child_ctx, args),
    );
    let pid = child.tid();
    ctx.kernel().procs().add(pid, child);
    pid as i32
}

/// Collect the exit status of a joinable child.
pub(super) fn sys_join(ctx: &KernelCtx<'_>, pid: u32) -> i32 {
    let pid = pid as usize;
    let child = match ctx.kernel().procs().get(pid) {
        Some(child) => child,
        None => {
            log::debug!("syscall Join: invalid pid {}", pid);
            return -1;
        }
    };
    if !child.joinable() {
        log::debug!("syscall Join: pid {} is not joinable", pid);
        return -1;
    }
    let status = child.join(ctx);
    ctx.kernel().procs().remove(pid);
    status
}
