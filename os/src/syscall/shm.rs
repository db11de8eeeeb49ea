//! Shared-memory syscalls
use crate::error::{VmError, VmResult};
use crate::fs::{FileDescriptor, OpenFlags};
use crate::mm::ShmHandle;
use crate::task::Process;

fn shm_handle(process: &Process, fd: usize) -> VmResult<(ShmHandle, bool)> {
    match process.inner_exclusive_access().descriptor(fd)? {
        FileDescriptor::Shm { handle, writable } => Ok((handle.clone(), *writable)),
        FileDescriptor::File(_) => Err(VmError::InvalidArgument),
    }
}

/// Open (or with `CREATE`, create) the object called by the user string
/// at `name`. Returns a new descriptor.
pub fn sys_shm_open(process: &Process, name: usize, flags: u32) -> VmResult<usize> {
    let name = process.translated_str(name)?;
    let flags = OpenFlags::from_bits_truncate(flags);
    let handle = process
        .kernel()
        .shm()
        .open(&name, flags.contains(OpenFlags::CREATE))?;
    let (_, writable) = flags.read_write();
    let fd = process
        .inner_exclusive_access()
        .alloc_fd(FileDescriptor::Shm { handle, writable })?;
    debug!("[kernel] process {} shm_open {} = {}", process.getpid(), name, fd);
    Ok(fd)
}

pub fn sys_shm_unlink(process: &Process, name: usize) -> VmResult<usize> {
    let name = process.translated_str(name)?;
    process.kernel().shm().unlink(&name)?;
    Ok(0)
}

/// Number of address spaces currently mapping the object behind `fd`.
pub fn sys_shm_stat(process: &Process, fd: usize) -> VmResult<usize> {
    let (handle, _) = shm_handle(process, fd)?;
    handle.stat()
}

/// Resize the shared-memory object behind `fd`. Regular files are not
/// resized here.
pub fn sys_ftruncate(process: &Process, fd: usize, size: usize) -> VmResult<usize> {
    let (handle, writable) = shm_handle(process, fd)?;
    if !writable {
        return Err(VmError::PermissionDenied);
    }
    handle.truncate(size)?;
    Ok(0)
}
