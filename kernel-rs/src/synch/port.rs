use std::sync::Arc;

use crate::{
    proc::KernelCtx,
    synch::{Condition, Lock, Spinlock},
};

struct PortState {
    buffer: i32,
    /// A message is sitting in the buffer, not yet consumed.
    buffer_full: bool,
    /// Receivers that have arrived and not yet been paired with a message.
    num_receive: u32,
    /// Teardown: everyone still blocked should give up and leave.
    get_out: bool,
}

/// Rendezvous port: an unbuffered channel where each `send` pairs with
/// exactly one `receive`, in FIFO order on both sides. A sender waits for a
/// receiver to be present and for the one-message buffer to be free; a
/// receiver announces itself and waits for a message.
pub struct Port {
    name: &'static str,
    lock: Arc<Lock>,
    /// A receiver arrived, or the buffer drained.
    new_receiver: Condition,
    /// A message landed in the buffer.
    message: Condition,
    state: Spinlock<PortState>,
}

impl Port {
    pub fn new(name: &'static str) -> Self {
        let lock = Arc::new(Lock::new("port lock"));
        Self {
            name,
            new_receiver: Condition::new("port receiver", Arc::clone(&lock)),
            message: Condition::new("port message", Arc::clone(&lock)),
            lock,
            state: Spinlock::new(
                "port state",
                PortState {
                    buffer: 0,
                    buffer_full: false,
                    num_receive: 0,
                    get_out: false,
                },
            ),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Deliver `message` to one receiver. Blocks until a receiver is
    /// present. Returns false when the port was torn down instead.
    pub fn send(&self, ctx: &KernelCtx<'_>, message: i32) -> bool {
        self.lock.acquire(ctx);
        loop {
            let state = self.state.lock();
            if state.get_out {
                drop(state);
                self.lock.release(ctx);
                return false;
            }
            if state.num_receive > 0 && !state.buffer_full {
                break;
            }
            drop(state);
            self.new_receiver.wait(ctx);
        }
        {
            let mut state = self.state.lock();
            state.buffer = message;
            state.buffer_full = true;
        }
        log::trace!("port {}: {} sent {}", self.name, ctx.thread().name(), message);
        self.message.signal(ctx);
        self.lock.release(ctx);
        true
    }

    /// Wait for one message. Returns None when the port was torn down.
    pub fn receive(&self, ctx: &KernelCtx<'_>) -> Option<i32> {
        self.lock.acquire(ctx);
        self.state.lock().num_receive += 1;
        self.new_receiver.signal(ctx);
        loop {
            let state = self.state.lock();
            if state.buffer_full {
                break;
            }
            if state.get_out {
                drop(state);
                self.state.lock().num_receive -= 1;
                self.lock.release(ctx);
                return None;
            }
            drop(state);
            self.message.wait(ctx);
        }
        let message = {
            let mut state = self.state.lock();
            state.buffer_full = false;
            state.num_receive -= 1;
            state.buffer
        };
        log::trace!(
            "port {}: {} received {}",
            self.name,
            ctx.thread().name(),
            message
        );
        // The buffer drained; another sender may go ahead.
        self.new_receiver.signal(ctx);
        self.lock.release(ctx);
        Some(message)
    }

    /// Tear the port down, releasing every blocked sender and receiver.
    pub fn destroy(&self, ctx: &KernelCtx<'_>) {
        self.lock.acquire(ctx);
        self.state.lock().get_out = true;
        self.new_receiver.broadcast(ctx);
        self.message.broadcast(ctx);
        self.lock.release(ctx);
    }
}
