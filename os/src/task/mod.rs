//! Process management implementation
//!
//! A [`Process`] is the owner of an address space and a descriptor table.
//! Scheduling is not modelled: a process runs on the caller's thread, and
//! `fork`/`exit`/`waitpid` only keep the bookkeeping the VM core needs.

mod pid;
mod process;

pub use pid::{pid_alloc, PidAllocator, PidHandle, PID_ALLOCATOR};
pub use process::{Process, ProcessInner, ProcessStatus};
