//! Synchronous console.
//!
//! The raw console is interrupt-driven; this wrapper turns each completion
//! into a semaphore the calling thread waits on, and serializes readers
//! and writers with separate locks so interleaved threads get whole
//! strings, not shuffled bytes.

use crate::{
    machine::Console,
    proc::KernelCtx,
    synch::{Lock, Semaphore},
};

pub struct SynchConsole {
    console: Console,
    /// A character is waiting to be read.
    can_read: Semaphore,
    /// The last write reached the output.
    write_done: Semaphore,
    read_lock: Lock,
    write_lock: Lock,
}

impl SynchConsole {
    pub fn new() -> Self {
        Self {
            console: Console::new(),
            can_read: Semaphore::new("read avail", 0),
            write_done: Semaphore::new("write done", 0),
            read_lock: Lock::new("console read"),
            write_lock: Lock::new("console write"),
        }
    }

    /// Queue input for the guest to read; the char-available interrupt
    /// fires per byte.
    pub fn feed_input(&self, ctx: &KernelCtx<'_>, bytes: &[u8]) {
        for byte in bytes {
            self.console.feed(*byte, &|| self.can_read.v(ctx));
        }
    }

    pub fn get_char(&self, ctx: &KernelCtx<'_>) -> u8 {
        self.read_lock.acquire(ctx);
        self.can_read.p(ctx);
        let byte = self.console.get_char();
        self.read_lock.release(ctx);
        byte
    }

    pub fn put_char(&self, ctx: &KernelCtx<'_>, byte: u8) {
        self.write_lock.acquire(ctx);
        self.console.put_char(byte, &|| self.write_done.v(ctx));
        self.write_done.p(ctx);
        self.write_lock.release(ctx);
    }

    /// Read exactly `len` bytes, waiting for input as needed.
    pub fn get_string(&self, ctx: &KernelCtx<'_>, len: usize) -> Vec<u8> {
        self.read_lock.acquire(ctx);
        let mut buffer = Vec::with_capacity(len);
        for _ in 0..len {
            self.can_read.p(ctx);
            buffer.push(self.console.get_char());
        }
        self.read_lock.release(ctx);
        buffer
    }

    /// Write a whole buffer, one completion at a time.
    pub fn put_string(&self, ctx: &KernelCtx<'_>, bytes: &[u8]) -> usize {
        self.write_lock.acquire(ctx);
        for byte in bytes {
            self.console.put_char(*byte, &|| self.write_done.v(ctx));
            self.write_done.p(ctx);
        }
        self.write_lock.release(ctx);
        bytes.len()
    }

    /// Everything the guest has written so far.
    pub fn output(&self) -> Vec<u8> {
        self.console.output()
    }
}

impl Default for SynchConsole {
    fn default() -> Self {
        Self::new()
    }
}
