//! Trap handling functionality
//!
//! Two kinds of trap reach the VM core: system calls, dispatched to
//! [`syscall()`], and page faults, served by the faulting process's memory
//! set. A fault the memory set cannot serve kills the process.

use crate::error::VmError;
use crate::mm::{AccessType, FaultOutcome, VirtAddr};
use crate::syscall::syscall;
use crate::task::Process;

/// cause of a trap from user mode
#[derive(Copy, Clone, Debug)]
pub enum Trap {
    /// `ecall`/`int 0x40` with the syscall id and its arguments
    UserEnvCall { id: usize, args: [usize; 6] },
    /// not-present or protection fault at `addr`
    PageFault { addr: VirtAddr, access: AccessType },
}

/// how the process continues after the trap
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TrapOutcome {
    /// syscall finished with this return value
    Return(isize),
    /// fault served, retry the access
    Resume,
    /// the process was terminated with this exit code
    Killed(i32),
}

/// Exit code of a process killed by a fatal fault.
pub fn fault_exit_code(err: VmError) -> i32 {
    match err {
        // page fault exit code
        VmError::ProtectionViolation => -2,
        VmError::OutOfMemory => -4,
        _ => -2,
    }
}

pub fn trap_handler(process: &Process, trap: Trap) -> TrapOutcome {
    match trap {
        Trap::UserEnvCall { id, args } => TrapOutcome::Return(syscall(process, id, args)),
        Trap::PageFault { addr, access } => {
            let outcome = process
                .inner_exclusive_access()
                .memory_set
                .handle_page_fault(addr, access);
            match outcome {
                FaultOutcome::Resume => TrapOutcome::Resume,
                FaultOutcome::Terminate(err) => {
                    error!(
                        "[kernel] {:?} fault in process {}, bad addr = {:#x}: {}, kernel killed it.",
                        access,
                        process.getpid(),
                        addr.0,
                        err
                    );
                    let code = fault_exit_code(err);
                    process.exit(code);
                    TrapOutcome::Killed(code)
                }
            }
        }
    }
}
