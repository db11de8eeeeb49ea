//! Memory-mapping syscalls
use crate::error::{VmError, VmResult};
use crate::fs::FileDescriptor;
use crate::mm::{Backing, MapPermission, Sharing};
use crate::task::Process;

pub const PROT_NONE: usize = 0;
pub const PROT_READ: usize = 1 << 0;
pub const PROT_WRITE: usize = 1 << 1;
pub const PROT_EXEC: usize = 1 << 2;

pub const MAP_SHARED: usize = 0x01;
pub const MAP_PRIVATE: usize = 0x02;
pub const MAP_ANONYMOUS: usize = 0x20;

/// what `mmap` returns on failure
pub const MAP_FAILED: isize = -1;

fn map_permission(prot: usize) -> VmResult<MapPermission> {
    if prot & !(PROT_READ | PROT_WRITE | PROT_EXEC) != 0 {
        return Err(VmError::InvalidArgument);
    }
    MapPermission::from_bits(prot as u8).ok_or(VmError::InvalidArgument)
}

/// Resolve the backing object and sharing mode of a mapping request.
///
/// Anonymous memory is always private. A descriptor mapping is shared
/// unless `MAP_PRIVATE` is given; shared memory cannot be mapped private.
fn mapping_source(
    process: &Process,
    perm: MapPermission,
    flags: usize,
    fd: usize,
) -> VmResult<(Sharing, Backing)> {
    if flags & !(MAP_SHARED | MAP_PRIVATE | MAP_ANONYMOUS) != 0 {
        return Err(VmError::InvalidArgument);
    }
    let (shared, private) = (flags & MAP_SHARED != 0, flags & MAP_PRIVATE != 0);
    if shared && private {
        return Err(VmError::InvalidArgument);
    }
    if flags & MAP_ANONYMOUS != 0 {
        if shared {
            return Err(VmError::InvalidArgument);
        }
        return Ok((Sharing::Private, Backing::Anonymous));
    }
    let inner = process.inner_exclusive_access();
    let desc = inner.descriptor(fd)?;
    let sharing = if private {
        Sharing::Private
    } else {
        Sharing::Shared
    };
    if !desc.readable()
        || (sharing == Sharing::Shared && perm.contains(MapPermission::W) && !desc.writable())
    {
        return Err(VmError::PermissionDenied);
    }
    match desc {
        FileDescriptor::File(file) => Ok((sharing, Backing::File(file.clone()))),
        FileDescriptor::Shm { handle, .. } => {
            if sharing == Sharing::Private {
                return Err(VmError::InvalidArgument);
            }
            Ok((sharing, Backing::Shared(handle.clone())))
        }
    }
}

/// Map `len` bytes at `addr` (exact) or anywhere in the mmap window
/// (`addr == 0`). Returns the mapped address.
pub fn sys_mmap(
    process: &Process,
    addr: usize,
    len: usize,
    prot: usize,
    flags: usize,
    fd: usize,
    offset: usize,
) -> VmResult<usize> {
    let perm = map_permission(prot)?;
    let (sharing, backing) = mapping_source(process, perm, flags, fd)?;
    let offset = if backing.is_anonymous() { 0 } else { offset };
    let result = process
        .inner_exclusive_access()
        .memory_set
        .mmap(addr, len, perm, sharing, backing, offset);
    match result {
        Ok(start) => info!(
            "[kernel] process {} mmap({:#x}, {:#x}, {:#x}, {:#x}) = {:#x}",
            process.getpid(),
            addr,
            len,
            prot,
            flags,
            start
        ),
        Err(err) => warn!(
            "[kernel] process {} mmap({:#x}, {:#x}, {:#x}, {:#x}) failed: {}",
            process.getpid(),
            addr,
            len,
            prot,
            flags,
            err
        ),
    }
    result
}

pub fn sys_munmap(process: &Process, addr: usize, len: usize) -> VmResult<usize> {
    process
        .inner_exclusive_access()
        .memory_set
        .munmap(addr, len)
        .map(|_| 0)
}

pub fn sys_msync(process: &Process, addr: usize, len: usize) -> VmResult<usize> {
    process
        .inner_exclusive_access()
        .memory_set
        .msync(addr, len)
        .map(|_| 0)
}
