//! Thread synchronization.
//!
//! Four blocking primitives built on the scheduler: counting semaphores,
//! locks with priority donation, condition variables, and rendezvous ports.
//! Atomicity inside each primitive comes from the kernel's single-runner
//! guarantee plus a short spin-locked section; blocking always goes through
//! `Semaphore`, so the scheduler sees one kind of sleep.

mod condition;
mod lock;
mod port;
mod semaphore;
mod spinlock;

pub use self::condition::Condition;
pub use self::lock::Lock;
pub use self::port::Port;
pub use self::semaphore::Semaphore;
pub use self::spinlock::{Spinlock, SpinlockGuard};
