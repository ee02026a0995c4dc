//! Kernel threads.
//!
//! A thread moves NEW -> READY -> RUNNING, bounces between BLOCKED and
//! READY while it waits on primitives, and ends FINISHED. A joinable thread
//! keeps its exit status after finishing so a parent can collect it with
//! `join`.
//!
//! Each thread owns the pieces of per-process state the kernel tracks: a
//! saved user register file, an optional address space, and a table of open
//! files addressed by the handles the Read/Write system calls use.

use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::Arc;

use crate::{
    error::KernelError,
    file::OpenFile,
    kernel::Kernel,
    param::{MAX_OPEN_FILES, NUM_TOTAL_REGS},
    synch::{Semaphore, Spinlock},
    vm::AddressSpace,
};

mod kernel_ctx;
mod scheduler;

pub use self::kernel_ctx::KernelCtx;
pub use self::scheduler::Scheduler;

use self::scheduler::Parker;

/// Thread lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    New,
    Ready,
    Running,
    Blocked,
    Finished,
}

pub(crate) struct SchedInfo {
    pub(crate) state: State,
    pub(crate) priority: u32,
    pub(crate) original_priority: u32,
    pub(crate) exit_status: i32,
}

/// Unwind payload used by `exit` to peel the kernel stack of a finished
/// thread. Never observed outside this module.
struct ThreadExit;

pub struct Thread {
    tid: usize,
    name: String,
    joinable: bool,
    pub(crate) sched: Spinlock<SchedInfo>,
    pub(crate) parker: Parker,
    /// Signalled once when the thread finishes; `join` waits on it.
    join_sem: Semaphore,
    space: Spinlock<Option<Arc<AddressSpace>>>,
    pub(crate) user_regs: Spinlock<[u32; NUM_TOTAL_REGS]>,
    open_files: Spinlock<Vec<Option<Arc<OpenFile>>>>,
}

impl Thread {
    fn new(tid: usize, name: &str, priority: u32, joinable: bool, state: State) -> Arc<Self> {
        Arc::new(Self {
            tid,
            name: name.to_string(),
            joinable,
            sched: Spinlock::new(
                "thread sched",
                SchedInfo {
                    state,
                    priority,
                    original_priority: priority,
                    exit_status: 0,
                },
            ),
            parker: Parker::new(),
            join_sem: Semaphore::new("thread join", 0),
            space: Spinlock::new("thread space", None),
            user_regs: Spinlock::new("thread user regs", [0; NUM_TOTAL_REGS]),
            open_files: Spinlock::new(
                "thread open files",
                (0..MAX_OPEN_FILES).map(|_| None).collect(),
            ),
        })
    }

    /// Turn the booting host thread into the first kernel thread.
    pub(crate) fn new_main(kernel: &Kernel) -> Arc<Self> {
        Self::new(kernel.scheduler().next_tid(), "main", 0, false, State::Running)
    }

    /// Create a kernel thread and put it on the ready list. `body` runs once
    /// the scheduler first dispatches it.
    pub fn fork<F>(
        kernel: &Arc<Kernel>,
        name: &str,
        priority: u32,
        joinable: bool,
        space: Option<Arc<AddressSpace>>,
        body: F,
    ) -> Arc<Thread>
    where
        F: FnOnce(&KernelCtx<'_>) + Send + 'static,
    {
        let tid = kernel.scheduler().next_tid();
        let thread = Self::new(tid, name, priority, joinable, State::New);
        if let Some(space) = space {
            *thread.space.lock() = Some(space);
        }
        kernel.scheduler().ready_to_run(Arc::clone(&thread));

        let kernel = Arc::clone(kernel);
        let carrier = Arc::clone(&thread);
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // Wait to be dispatched for the first time.
                carrier.parker.park();
                let ctx = KernelCtx::new(&kernel, &carrier);
                ctx.restore_user_context();
                let result = panic::catch_unwind(AssertUnwindSafe(|| body(&ctx)));
                if let Err(payload) = result {
                    if payload.downcast_ref::<ThreadExit>().is_none() {
                        // A genuine panic on a kernel thread; the panic hook
                        // has already reported it. Nothing can be salvaged.
                        process::abort();
                    }
                }
                kernel.scheduler().finish_current(&ctx);
            })
            .expect("fork: could not spawn host thread");
        thread
    }

    pub fn tid(&self) -> usize {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn joinable(&self) -> bool {
        self.joinable
    }

    pub fn state(&self) -> State {
        self.sched.lock().state
    }

    pub fn priority(&self) -> u32 {
        self.sched.lock().priority
    }

    /// Raise this thread's priority (priority donation).
    pub fn set_priority(&self, priority: u32) {
        self.sched.lock().priority = priority;
    }

    /// Drop back to the priority the thread was created with.
    pub fn restore_priority(&self) {
        let mut sched = self.sched.lock();
        sched.priority = sched.original_priority;
    }

    pub fn exit_status(&self) -> i32 {
        self.sched.lock().exit_status
    }

    pub(crate) fn signal_joiner(&self, ctx: &KernelCtx<'_>) {
        self.join_sem.v(ctx);
    }

    /// Wait for this (joinable) thread to finish and collect its status.
    pub fn join(&self, ctx: &KernelCtx<'_>) -> i32 {
        assert!(self.joinable, "join: thread {} is not joinable", self.name);
        self.join_sem.p(ctx);
        self.sched.lock().exit_status
    }

    pub fn space(&self) -> Option<Arc<AddressSpace>> {
        self.space.lock().clone()
    }

    pub fn set_space(&self, space: Arc<AddressSpace>) {
        *self.space.lock() = Some(space);
    }

    pub fn take_space(&self) -> Option<Arc<AddressSpace>> {
        self.space.lock().take()
    }

    /// Register an open file; the returned handle is what the guest uses.
    /// Handles 0 and 1 name the console, so files start at 2.
    pub fn add_file(&self, file: Arc<OpenFile>) -> Result<i32, KernelError> {
        let mut files = self.open_files.lock();
        for (i, slot) in files.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return Ok(i as i32 + 2);
            }
        }
        Err(KernelError::NoSpace)
    }

    pub fn get_file(&self, id: i32) -> Option<Arc<OpenFile>> {
        if id < 2 {
            return None;
        }
        let files = self.open_files.lock();
        files.get(id as usize - 2).and_then(|slot| slot.clone())
    }

    pub fn remove_file(&self, id: i32) -> Option<Arc<OpenFile>> {
        if id < 2 {
            return None;
        }
        let mut files = self.open_files.lock();
        files.get_mut(id as usize - 2).and_then(|slot| slot.take())
    }

    /// Empty the open-file table, yielding everything that was open.
    pub fn drain_files(&self) -> Vec<Arc<OpenFile>> {
        let mut files = self.open_files.lock();
        files.iter_mut().filter_map(|slot| slot.take()).collect()
    }
}

/// Pid -> thread map used by the Exec/Join system calls.
pub struct ProcessTable {
    entries: Spinlock<Vec<(usize, Arc<Thread>)>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            entries: Spinlock::new("process table", Vec::new()),
        }
    }

    pub fn add(&self, pid: usize, thread: Arc<Thread>) {
        self.entries.lock().push((pid, thread));
    }

    pub fn get(&self, pid: usize) -> Option<Arc<Thread>> {
        self.entries
            .lock()
            .iter()
            .find(|(p, _)| *p == pid)
            .map(|(_, t)| Arc::clone(t))
    }

    pub fn remove(&self, pid: usize) {
        self.entries.lock().retain(|(p, _)| *p != pid);
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Finish the current thread: run down its open files and address space,
/// record `status` for a joiner, and leave the kernel stack for good.
///
/// Only forked threads may call this; the boot thread returns from
/// `Kernel::run` instead.
pub fn exit(ctx: &KernelCtx<'_>, status: i32) -> ! {
    let thread = ctx.thread();
    log::debug!("exit: {} with status {}", thread.name(), status);
    for file in thread.drain_files() {
        ctx.kernel().fs().close(ctx, &file);
    }
    if let Some(space) = thread.take_space() {
        space.destroy(ctx);
    }
    thread.sched.lock().exit_status = status;
    panic::resume_unwind(Box::new(ThreadExit))
}
