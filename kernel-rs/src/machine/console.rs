//! Raw console device.
//!
//! Like the disk, the console is callback-driven: feeding a byte of input
//! fires the char-available callback, and putting a byte fires write-done
//! once the byte reaches the output sink. The synchronous console built on
//! top converts these into semaphore waits.

use std::collections::VecDeque;

use crate::synch::Spinlock;

pub struct Console {
    input: Spinlock<VecDeque<u8>>,
    output: Spinlock<Vec<u8>>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            input: Spinlock::new("console input", VecDeque::new()),
            output: Spinlock::new("console output", Vec::new()),
        }
    }

    /// Queue one byte of input. `avail` is the char-available interrupt.
    pub fn feed(&self, byte: u8, avail: &dyn Fn()) {
        self.input.lock().push_back(byte);
        avail();
    }

    /// Take the byte announced by the last char-available interrupt.
    pub fn get_char(&self) -> u8 {
        self.input
            .lock()
            .pop_front()
            .expect("console read with no input pending")
    }

    /// Emit one byte. `done` is the write-done interrupt.
    pub fn put_char(&self, byte: u8, done: &dyn Fn()) {
        self.output.lock().push(byte);
        done();
    }

    /// Everything written so far.
    pub fn output(&self) -> Vec<u8> {
        self.output.lock().clone()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use super::*;

    #[test]
    fn input_fires_one_interrupt_per_byte() {
        let console = Console::new();
        let interrupts = Cell::new(0u32);
        for byte in b"ab" {
            console.feed(*byte, &|| interrupts.set(interrupts.get() + 1));
        }
        assert_eq!(interrupts.get(), 2);
        assert_eq!(console.get_char(), b'a');
        assert_eq!(console.get_char(), b'b');
    }

    #[test]
    fn output_accumulates_in_order() {
        let console = Console::new();
        for byte in b"out" {
            console.put_char(*byte, &|| {});
        }
        assert_eq!(console.output(), b"out");
    }
}
