use std::sync::Arc;

use crate::{kernel::Kernel, proc::Thread};

/// Per-thread handle to the kernel: the current thread plus the kernel
/// context structure every subsystem hangs off. Each kernel operation takes
/// one of these instead of reaching for globals.
pub struct KernelCtx<'s> {
    kernel: &'s Arc<Kernel>,
    thread: &'s Arc<Thread>,
}

impl<'s> KernelCtx<'s> {
    pub fn new(kernel: &'s Arc<Kernel>, thread: &'s Arc<Thread>) -> Self {
        Self { kernel, thread }
    }

    pub fn kernel(&self) -> &'s Kernel {
        self.kernel
    }

    pub fn kernel_arc(&self) -> &'s Arc<Kernel> {
        self.kernel
    }

    pub fn thread(&self) -> &'s Arc<Thread> {
        self.thread
    }

    /// Stash the machine state a context switch must preserve for this
    /// thread: its user registers and the TLB bits of its address space.
    pub fn save_user_context(&self) {
        if let Some(space) = self.thread.space() {
            let machine = self.kernel().machine();
            let mut regs = self.thread.user_regs.lock();
            machine.save_registers(&mut regs);
            drop(regs);
            space.save_state(machine);
        }
    }

    /// Undo `save_user_context` when this thread gets the CPU back.
    pub fn restore_user_context(&self) {
        if let Some(space) = self.thread.space() {
            let machine = self.kernel().machine();
            let regs = self.thread.user_regs.lock();
            machine.restore_registers(&regs);
            drop(regs);
            space.restore_state(machine);
        }
    }
}
