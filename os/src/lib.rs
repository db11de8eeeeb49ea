//! The virtual-memory core of a small x86 teaching kernel.
//!
//! The crate is `no_std` + `alloc` and runs over a simulated physical
//! memory, so the whole VM path (page tables, demand paging, file and
//! shared-memory backed mappings) can be driven from a host program.
//!
//! - [`mm`]: address types, frames, page tables, backing objects, the
//!   shared-memory registry, memory sets and the page-fault path
//! - [`task`]: processes owning a memory set and a descriptor table
//! - [`trap`]: the trap dispatcher, turning fatal faults into process exit
//! - [`syscall`]: `mmap`/`munmap`/`msync`/`shm_*`/`ftruncate`/`close`
//! - [`kernel`]: boot of the simulated machine
#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

pub mod arch;
pub mod config;
pub mod error;
pub mod fs;
pub mod kernel;
pub mod mm;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod trap;

pub use error::{VmError, VmResult};
pub use kernel::{Kernel, KernelConfig};
