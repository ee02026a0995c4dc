//! File system calls.
//!
//! Handles 0 and 1 name console input and output; everything else comes
//! from the per-thread open-file table. Failures come back as -1, never as
//! a kernel panic — guest programs get to pass garbage.

use crate::{
    param::{CONSOLE_INPUT, CONSOLE_OUTPUT, PATH_MAX_LEN},
    proc::KernelCtx,
    syscall::transfer,
};

pub(super) fn sys_create(ctx: &KernelCtx<'_>, path_addr: u32) -> i32 {
    let path = match transfer::read_string_from_guest(ctx, path_addr, PATH_MAX_LEN) {
        Ok(path) => path,
        Err(_) => return 0,
    };
    log::debug!("syscall Create({:?})", path);
    match ctx.kernel().fs().create(ctx, &path, 0) {
        Ok(()) => 1,
        Err(err) => {
            log::debug!("Create({:?}) failed: {}", path, err);
            0
        }
    }
}

pub(super) fn sys_remove(ctx: &KernelCtx<'_>, path_addr: u32) -> i32 {
    let path = match transfer::read_string_from_guest(ctx, path_addr, PATH_MAX_LEN) {
        Ok(path) => path,
        Err(_) => return 0,
    };
    log::debug!("syscall Remove({:?})", path);
    match ctx.kernel().fs().remove(ctx, &path) {
        Ok(()) => 1,
        Err(err) => {
            log::debug!("Remove({:?}) failed: {}", path, err);
            0
        }
    }
}

pub(super) fn sys_open(ctx: &KernelCtx<'_>, path_addr: u32) -> i32 {
    let path = match transfer::read_string_from_guest(ctx, path_addr, PATH_MAX_LEN) {
        Ok(path) => path,
        Err(_) => return -1,
    };
    log::debug!("syscall Open({:?})", path);
    let file = match ctx.kernel().fs().open(ctx, &path) {
        Ok(file) => file,
        Err(err) => {
            log::debug!("Open({:?}) failed: {}", path, err);
            return -1;
        }
    };
    match ctx.thread().add_file(file.clone()) {
        Ok(id) => id,
        Err(_) => {
            // Out of handle slots; give the open back.
            ctx.kernel().fs().close(ctx, &file);
            -1
        }
    }
}

pub(super) fn sys_close(ctx: &KernelCtx<'_>, id: i32) -> i32 {
    log::debug!("syscall Close({})", id);
    // Closing a handle that is not open is a no-op.
    if let Some(file) = ctx.thread().remove_file(id) {
        ctx.kernel().fs().close(ctx, &file);
    }
    0
}

pub(super) fn sys_read(ctx: &KernelCtx<'_>, buf_addr: u32, size: u32, id: i32) -> i32 {
    if size == 0 {
        return 0;
    }
    match id {
        CONSOLE_INPUT => {
            let data = ctx.kernel().console().get_string(ctx, size as usize);
            match transfer::write_buffer_to_guest(ctx, buf_addr, &data) {
                Ok(()) => data.len() as i32,
                Err(_) => -1,
            }
        }
        CONSOLE_OUTPUT => -1,
        _ => match ctx.thread().get_file(id) {
            Some(file) => {
                let mut data = vec![0u8; size as usize];
                let read = file.read(ctx, &mut data);
                match transfer::write_buffer_to_guest(ctx, buf_addr, &data[..read]) {
                    Ok(()) => read as i32,
                    Err(_) => -1,
                }
            }
            None => -1,
        },
    }
}

pub(super) fn sys_write(ctx: &KernelCtx<'_>, buf_addr: u32, size: u32, id: i32) -> i32 {
    if size == 0 {
        return 0;
    }
    match id {
        CONSOLE_OUTPUT => {
            let data = match transfer::read_buffer_from_guest(ctx, buf_addr, size as usize) {
                Ok(data) => data,
                Err(_) => return -1,
            };
            ctx.kernel().console().put_string(ctx, &data) as i32
        }
        CONSOLE_INPUT => -1,
        _ => match ctx.thread().get_file(id) {
            Some(file) => {
                let data = match transfer::read_buffer_from_guest(ctx, buf_addr, size as usize) {
                    Ok(data) => data,
                    Err(_) => return -1,
                };
                file.write(ctx, &data) as i32
            }
            None => -1,
        },
    }
}
