//! An instructional operating-system kernel multiplexing a simulated MIPS
//! machine among user programs.
//!
//! The layers, bottom up:
//!
//! - [`thread`]: cooperative kernel threads on a simulated uniprocessor.
//! - [`sync`]: semaphore, lock with priority donation, condition variable,
//!   synchronous channel.
//! - [`fs`]: the on-disk file system (free map, two-level-indirect file
//!   headers, hierarchical directories) and the open-file synchronization
//!   layer (readers/writers with deferred delete).
//! - [`vm`]: per-process address spaces, demand paging, the coremap frame
//!   scheduler and per-space swap files.
//! - [`userprog`]: the user/kernel boundary — executable images, user-memory
//!   transfer, the syscall register ABI, the synchronized console.
//!
//! Everything hangs off a single [`Kernel`] object; there are no process-wide
//! globals, so each test can boot its own machine.

#[macro_use]
extern crate static_assertions;

pub mod config;
pub mod fs;
mod kernel;
pub mod sync;
pub mod thread;
pub mod userprog;
pub mod vm;

pub use kernel::{Kernel, KernelConfig};
