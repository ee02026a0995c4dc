use std::sync::Arc;

use crate::{
    proc::{KernelCtx, Thread},
    synch::{Semaphore, Spinlock},
};

/// Mutual exclusion with an owner and priority donation: when a thread
/// blocks on a lock held by a lower-priority owner, the owner borrows the
/// waiter's priority until it releases.
pub struct Lock {
    name: &'static str,
    semaphore: Semaphore,
    owner: Spinlock<Option<Arc<Thread>>>,
}

impl Lock {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            semaphore: Semaphore::new(name, 1),
            owner: Spinlock::new("lock owner", None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn acquire(&self, ctx: &KernelCtx<'_>) {
        assert!(
            !self.held_by_current(ctx),
            "lock {}: acquired twice by {}",
            self.name,
            ctx.thread().name()
        );
        {
            let owner = self.owner.lock();
            if let Some(owner) = owner.as_ref() {
                let priority = ctx.thread().priority();
                if owner.priority() < priority {
                    log::debug!(
                        "lock {}: {} donates priority {} to {}",
                        self.name,
                        ctx.thread().name(),
                        priority,
                        owner.name()
                    );
                    owner.set_priority(priority);
                }
            }
        }
        self.semaphore.p(ctx);
        *self.owner.lock() = Some(Arc::clone(ctx.thread()));
        log::trace!("lock {}: acquired by {}", self.name, ctx.thread().name());
    }

    pub fn release(&self, ctx: &KernelCtx<'_>) {
        assert!(
            self.held_by_current(ctx),
            "lock {}: released by {} who does not hold it",
            self.name,
            ctx.thread().name()
        );
        log::trace!("lock {}: released by {}", self.name, ctx.thread().name());
        ctx.thread().restore_priority();
        *self.owner.lock() = None;
        self.semaphore.v(ctx);
    }

    pub fn held_by_current(&self, ctx: &KernelCtx<'_>) -> bool {
        match self.owner.lock().as_ref() {
            Some(owner) => Arc::ptr_eq(owner, ctx.thread()),
            None => false,
        }
    }
}
