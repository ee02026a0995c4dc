//! The single-CPU scheduler.
//!
//! Each kernel thread is carried by a host thread, but the hand-off
//! protocol below keeps exactly one of them executing at any instant: a
//! thread leaves the CPU only by parking itself after waking its successor.
//! That single-runner window is the kernel's atomicity gate — the hosted
//! stand-in for running with interrupts disabled on a uniprocessor.
//!
//! The ready list is FIFO within a priority; the highest priority runs
//! first, which is what lets lock holders profit from donated priority.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::sync::Arc;

use crate::{
    param::MAX_PROCESSES,
    proc::{KernelCtx, State, Thread},
    synch::Spinlock,
};

/// One-shot hand-off flag each thread parks on.
pub(crate) struct Parker {
    go: Mutex<bool>,
    cv: Condvar,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Self {
            go: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn park(&self) {
        let mut go = self.go.lock().expect("parker poisoned");
        while !*go {
            go = self.cv.wait(go).expect("parker poisoned");
        }
        *go = false;
    }

    pub(crate) fn unpark(&self) {
        let mut go = self.go.lock().expect("parker poisoned");
        *go = true;
        self.cv.notify_one();
    }
}

pub struct Scheduler {
    ready: Spinlock<VecDeque<Arc<Thread>>>,
    current: Spinlock<Option<Arc<Thread>>>,
    next_tid: AtomicUsize,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            ready: Spinlock::new("ready list", VecDeque::new()),
            current: Spinlock::new("current thread", None),
            next_tid: AtomicUsize::new(1),
        }
    }

    pub(crate) fn next_tid(&self) -> usize {
        self.next_tid.fetch_add(1, Ordering::Relaxed) % MAX_PROCESSES
    }

    /// The thread holding the CPU.
    pub fn current(&self) -> Arc<Thread> {
        self.current
            .lock()
            .as_ref()
            .expect("no current thread")
            .clone()
    }

    pub(crate) fn set_current(&self, thread: Arc<Thread>) {
        *self.current.lock() = Some(thread);
    }

    /// Put a thread on the ready list.
    pub fn ready_to_run(&self, thread: Arc<Thread>) {
        thread.sched.lock().state = State::Ready;
        self.ready.lock().push_back(thread);
    }

    /// Threads waiting for the CPU.
    pub fn ready_count(&self) -> usize {
        self.ready.lock().len()
    }

    /// Take the best ready thread: highest priority, FIFO within one.
    fn pop_next(&self) -> Option<Arc<Thread>> {
        let mut ready = self.ready.lock();
        if ready.is_empty() {
            return None;
        }
        let mut best = 0;
        let mut best_priority = 0;
        for (i, thread) in ready.iter().enumerate() {
            let priority = thread.priority();
            if i == 0 || priority > best_priority {
                best = i;
                best_priority = priority;
            }
        }
        ready.remove(best)
    }

    /// Voluntarily hand the CPU to the next ready thread, if any.
    pub fn yield_now(&self, ctx: &KernelCtx<'_>) {
        if let Some(next) = self.pop_next() {
            let current = ctx.thread().clone();
            log::trace!("yield: {} -> {}", current.name(), next.name());
            current.sched.lock().state = State::Ready;
            self.ready.lock().push_back(current);
            self.switch_to(ctx, next);
        }
    }

    /// Block the current thread. The caller must already have queued it on
    /// whatever wait list will wake it; a wakeup that never comes leaves the
    /// whole machine idle, which is a kernel bug.
    pub(crate) fn sleep_current(&self, ctx: &KernelCtx<'_>) {
        ctx.thread().sched.lock().state = State::Blocked;
        let next = self
            .pop_next()
            .expect("sleep: no runnable threads (deadlock)");
        self.switch_to(ctx, next);
    }

    /// Terminal hand-off for a finished thread: wake the successor and let
    /// the host thread fall off the end without parking.
    pub(crate) fn finish_current(&self, ctx: &KernelCtx<'_>) {
        let thread = ctx.thread();
        log::trace!("finish: {}", thread.name());
        thread.sched.lock().state = State::Finished;
        if thread.joinable() {
            thread.signal_joiner(ctx);
        }
        let next = self
            .pop_next()
            .expect("finish: no runnable threads (deadlock)");
        self.dispatch(next);
    }

    /// Give the CPU to `next` and wait until this thread is scheduled again.
    fn switch_to(&self, ctx: &KernelCtx<'_>, next: Arc<Thread>) {
        ctx.save_user_context();
        self.dispatch(next);
        ctx.thread().parker.park();
        ctx.restore_user_context();
    }

    fn dispatch(&self, next: Arc<Thread>) {
        next.sched.lock().state = State::Running;
        *self.current.lock() = Some(Arc::clone(&next));
        next.parker.unpark();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
