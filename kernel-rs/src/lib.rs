//! A pedagogical operating system kernel over a simulated MIPS machine.
//!
//! The kernel core: a hierarchical file system with extensible files and a
//! write-back sector cache, demand paging with per-process swap over a
//! software TLB, and a cooperative thread layer with semaphores, locks
//! (priority donation), condition variables and rendezvous ports.
//!
//! The instruction interpreter, user binaries and launcher glue are
//! external; `machine` holds the narrow contracts the core consumes.

pub mod bio;
pub mod console;
pub mod error;
pub mod exec;
pub mod file;
pub mod fs;
pub mod kernel;
pub mod machine;
pub mod noff;
pub mod param;
pub mod proc;
pub mod synch;
pub mod syscall;
pub mod trap;
pub mod vm;
