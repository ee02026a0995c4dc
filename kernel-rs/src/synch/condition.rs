use std::collections::VecDeque;
use std::sync::Arc;

use crate::{
    proc::KernelCtx,
    synch::{Lock, Semaphore, Spinlock},
};

/// Mesa-style condition variable over an associated lock.
///
/// Every waiter parks on its own one-shot semaphore; `signal` hands the
/// oldest one a token, `broadcast` hands every waiter one. The wait set
/// itself is guarded by a small internal lock so that signalers and waiters
/// never race on it.
pub struct Condition {
    name: &'static str,
    lock: Arc<Lock>,
    waiters: Spinlock<VecDeque<Arc<Semaphore>>>,
}

impl Condition {
    pub fn new(name: &'static str, lock: Arc<Lock>) -> Self {
        Self {
            name,
            lock,
            waiters: Spinlock::new("condition waiters", VecDeque::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Release the associated lock, wait for a signal, reacquire.
    /// The caller must hold the lock.
    pub fn wait(&self, ctx: &KernelCtx<'_>) {
        assert!(
            self.lock.held_by_current(ctx),
            "condition {}: wait without the lock",
            self.name
        );
        let waiter = Arc::new(Semaphore::new("condition waiter", 0));
        self.waiters.lock().push_back(Arc::clone(&waiter));
        self.lock.release(ctx);
        waiter.p(ctx);
        self.lock.acquire(ctx);
    }

    /// Wake the oldest waiter, if any.
    pub fn signal(&self, ctx: &KernelCtx<'_>) {
        let waiter = self.waiters.lock().pop_front();
        if let Some(waiter) = waiter {
            waiter.v(ctx);
        }
    }

    /// Wake every waiter.
    pub fn broadcast(&self, ctx: &KernelCtx<'_>) {
        let all: Vec<Arc<Semaphore>> = {
            let mut waiters = self.waiters.lock();
            waiters.drain(..).collect()
        };
        for waiter in all {
            waiter.v(ctx);
        }
    }
}
