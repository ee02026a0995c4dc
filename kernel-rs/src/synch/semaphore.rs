use std::collections::VecDeque;
use std::sync::Arc;

use crate::{proc::KernelCtx, proc::Thread, synch::Spinlock};

struct SemInner {
    value: u32,
    /// FIFO: `v` always wakes the longest waiter.
    queue: VecDeque<Arc<Thread>>,
}

/// Counting semaphore.
pub struct Semaphore {
    name: &'static str,
    inner: Spinlock<SemInner>,
}

impl Semaphore {
    pub fn new(name: &'static str, initial: u32) -> Self {
        Self {
            name,
            inner: Spinlock::new(
                "semaphore",
                SemInner {
                    value: initial,
                    queue: VecDeque::new(),
                },
            ),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait until the value is positive, then take one.
    pub fn p(&self, ctx: &KernelCtx<'_>) {
        loop {
            let mut inner = self.inner.lock();
            if inner.value > 0 {
                inner.value -= 1;
                return;
            }
            log::trace!("{} sleeps on {}", ctx.thread().name(), self.name);
            inner.queue.push_back(Arc::clone(ctx.thread()));
            drop(inner);
            ctx.kernel().scheduler().sleep_current(ctx);
        }
    }

    /// Add one, waking the longest waiter if there is one.
    pub fn v(&self, ctx: &KernelCtx<'_>) {
        let waiter = {
            let mut inner = self.inner.lock();
            inner.value += 1;
            inner.queue.pop_front()
        };
        if let Some(thread) = waiter {
            ctx.kernel().scheduler().ready_to_run(thread);
        }
    }

    pub fn value(&self) -> u32 {
        self.inner.lock().value
    }
}
