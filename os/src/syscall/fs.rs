//! File-related syscalls
use crate::error::VmResult;
use crate::task::Process;

/// Release descriptor `fd`. Mappings made through it stay valid.
pub fn sys_close(process: &Process, fd: usize) -> VmResult<usize> {
    process.inner_exclusive_access().close(fd)?;
    Ok(0)
}
