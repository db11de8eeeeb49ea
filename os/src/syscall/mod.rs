//! Implementation of syscalls
//!
//! The single entry point to all system calls, [`syscall()`], is called
//! by the trap handler whenever a process issues one. It dispatches on
//! the syscall id to a typed `sys_*` function and turns its result into
//! the user-visible return value: the value itself, or `-1` on any error.
//! `MAP_FAILED` is that same `-1`.

pub const SYSCALL_FTRUNCATE: usize = 46;
pub const SYSCALL_CLOSE: usize = 57;
pub const SYSCALL_MUNMAP: usize = 215;
pub const SYSCALL_MMAP: usize = 222;
pub const SYSCALL_MSYNC: usize = 227;
pub const SYSCALL_SHM_OPEN: usize = 500;
pub const SYSCALL_SHM_UNLINK: usize = 501;
pub const SYSCALL_SHM_STAT: usize = 502;

mod fs;
mod mm;
mod shm;

pub use fs::sys_close;
pub use mm::{
    sys_mmap, sys_msync, sys_munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, MAP_SHARED,
    PROT_EXEC, PROT_NONE, PROT_READ, PROT_WRITE,
};
pub use shm::{sys_ftruncate, sys_shm_open, sys_shm_stat, sys_shm_unlink};

use crate::error::{VmError, VmResult};
use crate::task::Process;

/// handle syscall exception with `syscall_id` and other arguments
pub fn syscall(process: &Process, syscall_id: usize, args: [usize; 6]) -> isize {
    let result = match syscall_id {
        SYSCALL_FTRUNCATE => sys_ftruncate(process, args[0], args[1]),
        SYSCALL_CLOSE => sys_close(process, args[0]),
        SYSCALL_MUNMAP => sys_munmap(process, args[0], args[1]),
        SYSCALL_MMAP => sys_mmap(process, args[0], args[1], args[2], args[3], args[4], args[5]),
        SYSCALL_MSYNC => sys_msync(process, args[0], args[1]),
        SYSCALL_SHM_OPEN => sys_shm_open(process, args[0], args[1] as u32),
        SYSCALL_SHM_UNLINK => sys_shm_unlink(process, args[0]),
        SYSCALL_SHM_STAT => sys_shm_stat(process, args[0]),
        _ => {
            error!("Unsupported syscall_id: {}", syscall_id);
            Err(VmError::InvalidArgument)
        }
    };
    syscall_return(process, syscall_id, result)
}

fn syscall_return(process: &Process, syscall_id: usize, result: VmResult<usize>) -> isize {
    match result {
        Ok(value) => value as isize,
        Err(err) => {
            debug!(
                "[kernel] process {} syscall {} failed: {}",
                process.getpid(),
                syscall_id,
                err
            );
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;
    use crate::fs::tests::MemFile;
    use crate::fs::OpenFlags;
    use crate::kernel::{Kernel, KernelConfig};
    use alloc::sync::Arc;

    fn spawn() -> (Arc<Kernel>, Arc<Process>) {
        let kernel = Kernel::boot(KernelConfig {
            frames: 32,
            ..KernelConfig::default()
        })
        .unwrap();
        let process = kernel.spawn().unwrap();
        (kernel, process)
    }

    fn mmap(process: &Process, addr: usize, len: usize, prot: usize, flags: usize, fd: usize) -> isize {
        syscall(process, SYSCALL_MMAP, [addr, len, prot, flags, fd, 0])
    }

    /// Put a NUL-terminated string into a fresh scratch page.
    fn user_str(process: &Process, s: &str) -> usize {
        let rw = PROT_READ | PROT_WRITE;
        let page = mmap(process, 0, PAGE_SIZE, rw, MAP_ANONYMOUS | MAP_PRIVATE, 0) as usize;
        process.store(page, s.as_bytes()).unwrap();
        process.store(page + s.len(), &[0]).unwrap();
        page
    }

    #[test]
    fn mmap_flag_combinations() {
        let (_kernel, process) = spawn();
        let rw = PROT_READ | PROT_WRITE;
        assert_ne!(mmap(&process, 0, PAGE_SIZE, rw, MAP_ANONYMOUS, 0), MAP_FAILED);
        assert_eq!(mmap(&process, 0, PAGE_SIZE, rw, MAP_ANONYMOUS | MAP_SHARED, 0), MAP_FAILED);
        assert_eq!(mmap(&process, 0, PAGE_SIZE, rw, MAP_SHARED | MAP_PRIVATE, 0), MAP_FAILED);
        assert_eq!(mmap(&process, 0, PAGE_SIZE, rw | 0x10, MAP_ANONYMOUS, 0), MAP_FAILED);
        assert_eq!(mmap(&process, 0, PAGE_SIZE, rw, MAP_ANONYMOUS | 0x100, 0), MAP_FAILED);
        assert_eq!(mmap(&process, 0, 100, rw, MAP_ANONYMOUS, 0), MAP_FAILED);
        // no such descriptor
        assert_eq!(mmap(&process, 0, PAGE_SIZE, PROT_READ, MAP_SHARED, 5), MAP_FAILED);
        assert_eq!(syscall(&process, 9999, [0; 6]), -1);
    }

    #[test]
    fn file_mappings_follow_descriptor_access() {
        let (_kernel, process) = spawn();
        let ro = process.open(MemFile::new(&[1u8; 64], false)).unwrap();
        let rw = PROT_READ | PROT_WRITE;
        assert_eq!(mmap(&process, 0, PAGE_SIZE, rw, MAP_SHARED, ro), MAP_FAILED);
        // 默认共享映射
        assert_eq!(mmap(&process, 0, PAGE_SIZE, rw, 0, ro), MAP_FAILED);
        let private = mmap(&process, 0, PAGE_SIZE, rw, MAP_PRIVATE, ro);
        assert_ne!(private, MAP_FAILED);
        process.store(private as usize, &[9]).unwrap();
        let read = mmap(&process, 0, PAGE_SIZE, PROT_READ, MAP_SHARED, ro);
        let mut byte = [0u8; 1];
        process.load(read as usize, &mut byte).unwrap();
        assert_eq!(byte[0], 1);
        assert_eq!(syscall(&process, SYSCALL_CLOSE, [ro, 0, 0, 0, 0, 0]), 0);
        assert_eq!(syscall(&process, SYSCALL_CLOSE, [ro, 0, 0, 0, 0, 0]), -1);
        // mappings outlive the descriptor
        process.load(read as usize + 1, &mut byte).unwrap();
        assert_eq!(byte[0], 1);
    }

    #[test]
    fn munmap_and_msync_report_errors() {
        let (_kernel, process) = spawn();
        let rw = PROT_READ | PROT_WRITE;
        let addr = mmap(&process, 0, 4 * PAGE_SIZE, rw, MAP_ANONYMOUS, 0) as usize;
        assert_eq!(syscall(&process, SYSCALL_MSYNC, [addr, PAGE_SIZE, 0, 0, 0, 0]), 0);
        assert_eq!(syscall(&process, SYSCALL_MUNMAP, [addr + 1, PAGE_SIZE, 0, 0, 0, 0]), -1);
        assert_eq!(syscall(&process, SYSCALL_MUNMAP, [addr, 0, 0, 0, 0, 0]), -1);
        assert_eq!(syscall(&process, SYSCALL_MUNMAP, [addr, 2 * PAGE_SIZE, 0, 0, 0, 0]), 0);
        assert_eq!(syscall(&process, SYSCALL_MUNMAP, [addr, PAGE_SIZE, 0, 0, 0, 0]), -1);
        assert_eq!(syscall(&process, SYSCALL_MSYNC, [addr, PAGE_SIZE, 0, 0, 0, 0]), -1);
        assert_eq!(
            syscall(&process, SYSCALL_MUNMAP, [addr + 2 * PAGE_SIZE, 2 * PAGE_SIZE, 0, 0, 0, 0]),
            0
        );
    }

    #[test]
    fn shm_lifecycle() {
        let (kernel, process) = spawn();
        let flags = (OpenFlags::CREATE | OpenFlags::RDWR).bits() as usize;
        let bad = user_str(&process, "no-slash");
        assert_eq!(syscall(&process, SYSCALL_SHM_OPEN, [bad, flags, 0, 0, 0, 0]), -1);
        let name = user_str(&process, "/seg");
        let missing = syscall(&process, SYSCALL_SHM_OPEN, [name, OpenFlags::RDWR.bits() as usize, 0, 0, 0, 0]);
        assert_eq!(missing, -1);
        let fd = syscall(&process, SYSCALL_SHM_OPEN, [name, flags, 0, 0, 0, 0]) as usize;
        assert_eq!(syscall(&process, SYSCALL_FTRUNCATE, [fd, 2 * PAGE_SIZE, 0, 0, 0, 0]), 0);
        let rw = PROT_READ | PROT_WRITE;
        assert_eq!(mmap(&process, 0, PAGE_SIZE, rw, MAP_PRIVATE, fd), MAP_FAILED);
        let a = mmap(&process, 0, 2 * PAGE_SIZE, rw, MAP_SHARED, fd) as usize;
        let b = mmap(&process, 0, 2 * PAGE_SIZE, rw, MAP_SHARED, fd) as usize;
        assert_eq!(syscall(&process, SYSCALL_SHM_STAT, [fd, 0, 0, 0, 0, 0]), 1);
        process.store(a + PAGE_SIZE, b"shared").unwrap();
        let mut buf = [0u8; 6];
        process.load(b + PAGE_SIZE, &mut buf).unwrap();
        assert_eq!(&buf, b"shared");

        let child = process.fork().unwrap();
        assert_eq!(syscall(&process, SYSCALL_SHM_STAT, [fd, 0, 0, 0, 0, 0]), 2);
        child.exit(0);
        assert_eq!(syscall(&process, SYSCALL_SHM_STAT, [fd, 0, 0, 0, 0, 0]), 1);

        let ro = syscall(&process, SYSCALL_SHM_OPEN, [name, 0, 0, 0, 0, 0]) as usize;
        assert_eq!(syscall(&process, SYSCALL_FTRUNCATE, [ro, PAGE_SIZE, 0, 0, 0, 0]), -1);
        assert_eq!(mmap(&process, 0, PAGE_SIZE, rw, MAP_SHARED, ro), MAP_FAILED);

        assert_eq!(syscall(&process, SYSCALL_SHM_UNLINK, [name, 0, 0, 0, 0, 0]), 0);
        assert_eq!(syscall(&process, SYSCALL_SHM_UNLINK, [name, 0, 0, 0, 0, 0]), -1);
        // unlinked but still mapped
        process.load(a + PAGE_SIZE, &mut buf).unwrap();
        assert_eq!(&buf, b"shared");
        assert_eq!(kernel.shm().len(), 1);
        assert_eq!(syscall(&process, SYSCALL_MUNMAP, [a, 2 * PAGE_SIZE, 0, 0, 0, 0]), 0);
        assert_eq!(syscall(&process, SYSCALL_MUNMAP, [b, 2 * PAGE_SIZE, 0, 0, 0, 0]), 0);
        assert_eq!(kernel.shm().len(), 0);
    }
}
