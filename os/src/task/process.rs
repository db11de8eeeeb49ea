//!Implementation of [`Process`]
use super::{pid_alloc, PidHandle};
use crate::config::{MAX_FD, PAGE_SIZE};
use crate::error::{VmError, VmResult};
use crate::fs::{File, FileDescriptor};
use crate::kernel::Kernel;
use crate::mm::{AccessType, FaultOutcome, MemorySet, PhysAddr, PhysMemory, VirtAddr};
use crate::sync::UPSafeCell;
use crate::trap::{fault_exit_code, trap_handler, Trap, TrapOutcome};
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::cell::RefMut;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ProcessStatus {
    Running,
    Zombie,
}

pub struct Process {
    // immutable
    pub pid: PidHandle,
    kernel: Arc<Kernel>,
    // mutable
    inner: UPSafeCell<ProcessInner>,
}

pub struct ProcessInner {
    pub status: ProcessStatus,
    // 进程的地址空间，退出时数据页被回收，页表随进程控制块一起回收
    pub memory_set: MemorySet,
    pub fd_table: Vec<Option<FileDescriptor>>,
    // parent 使用 Weak，避免父子进程之间形成引用环
    pub parent: Option<Weak<Process>>,
    pub children: Vec<Arc<Process>>,
    pub exit_code: i32,
}

impl ProcessInner {
    pub fn is_zombie(&self) -> bool {
        self.status == ProcessStatus::Zombie
    }
    /// Place `desc` in the lowest free slot.
    pub fn alloc_fd(&mut self, desc: FileDescriptor) -> VmResult<usize> {
        if let Some(fd) = self.fd_table.iter().position(|slot| slot.is_none()) {
            self.fd_table[fd] = Some(desc);
            Ok(fd)
        } else if self.fd_table.len() < MAX_FD {
            self.fd_table.push(Some(desc));
            Ok(self.fd_table.len() - 1)
        } else {
            Err(VmError::OutOfMemory)
        }
    }
    pub fn descriptor(&self, fd: usize) -> VmResult<&FileDescriptor> {
        self.fd_table
            .get(fd)
            .and_then(|slot| slot.as_ref())
            .ok_or(VmError::BadDescriptor)
    }
    pub fn close(&mut self, fd: usize) -> VmResult<()> {
        self.fd_table
            .get_mut(fd)
            .and_then(|slot| slot.take())
            .map(|_| ())
            .ok_or(VmError::BadDescriptor)
    }
}

impl Process {
    /// A fresh process with an empty address space.
    pub fn new(kernel: &Arc<Kernel>) -> VmResult<Arc<Self>> {
        let memory_set = MemorySet::new_bare(kernel.memory(), kernel.mmap_window())?;
        let process = Arc::new(Self {
            pid: pid_alloc(),
            kernel: Arc::clone(kernel),
            inner: unsafe {
                UPSafeCell::new(ProcessInner {
                    status: ProcessStatus::Running,
                    memory_set,
                    fd_table: Vec::new(),
                    parent: None,
                    children: Vec::new(),
                    exit_code: 0,
                })
            },
        });
        info!("[kernel] process {} created", process.getpid());
        Ok(process)
    }
    pub fn inner_exclusive_access(&self) -> RefMut<'_, ProcessInner> {
        self.inner.exclusive_access()
    }
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }
    pub fn getpid(&self) -> usize {
        self.pid.0
    }
    pub fn is_zombie(&self) -> bool {
        self.inner_exclusive_access().is_zombie()
    }
    pub fn exit_code(&self) -> i32 {
        self.inner_exclusive_access().exit_code
    }
    /// Install an already opened file in the descriptor table.
    pub fn open(&self, file: Arc<dyn File>) -> VmResult<usize> {
        self.inner_exclusive_access()
            .alloc_fd(FileDescriptor::File(file))
    }
    // 子进程的地址空间通过 MemorySet::from_existed_user 复制父进程地址空间得到
    pub fn fork(self: &Arc<Self>) -> VmResult<Arc<Self>> {
        let mut parent_inner = self.inner_exclusive_access();
        let memory_set = MemorySet::from_existed_user(&parent_inner.memory_set)?;
        let child = Arc::new(Process {
            pid: pid_alloc(),
            kernel: Arc::clone(&self.kernel),
            inner: unsafe {
                UPSafeCell::new(ProcessInner {
                    status: ProcessStatus::Running,
                    memory_set,
                    fd_table: parent_inner.fd_table.clone(),
                    parent: Some(Arc::downgrade(self)),
                    children: Vec::new(),
                    exit_code: 0,
                })
            },
        });
        parent_inner.children.push(Arc::clone(&child));
        info!("[kernel] process {} forked {}", self.getpid(), child.getpid());
        Ok(child)
    }
    /// Turn into a zombie: flush and release all user memory and close
    /// every descriptor. The page tables go with the last reference.
    pub fn exit(&self, exit_code: i32) {
        let mut inner = self.inner_exclusive_access();
        if inner.is_zombie() {
            return;
        }
        inner.status = ProcessStatus::Zombie;
        inner.exit_code = exit_code;
        inner.memory_set.recycle_data_pages();
        inner.fd_table.clear();
        inner.children.clear();
        info!("[kernel] process {} exited with {}", self.getpid(), exit_code);
    }
    /// Reap a zombie child, any child when `pid == -1`.
    pub fn waitpid(&self, pid: isize) -> Option<(usize, i32)> {
        let mut inner = self.inner_exclusive_access();
        let idx = inner.children.iter().position(|child| {
            (pid == -1 || pid as usize == child.getpid()) && child.is_zombie()
        })?;
        let child = inner.children.remove(idx);
        let found = (child.getpid(), child.exit_code());
        Some(found)
    }

    /// Translate a user access of `va`, faulting pages in as needed. On a
    /// fatal fault the process is gone and its exit code is returned.
    fn translate_user(&self, va: VirtAddr, access: AccessType) -> Result<PhysAddr, i32> {
        for _ in 0..2 {
            {
                let inner = self.inner_exclusive_access();
                if inner.is_zombie() {
                    return Err(inner.exit_code);
                }
                if let Some(pte) = inner.memory_set.translate(va.floor()) {
                    if pte.user() && (access != AccessType::Write || pte.writable()) {
                        let page: PhysAddr = pte.ppn().into();
                        return Ok(PhysAddr(page.0 + va.page_offset()));
                    }
                }
            }
            if let TrapOutcome::Killed(code) = trap_handler(self, Trap::PageFault { addr: va, access })
            {
                return Err(code);
            }
        }
        // installed but still not accessible
        let code = fault_exit_code(VmError::ProtectionViolation);
        self.exit(code);
        Err(code)
    }
    fn user_access(
        &self,
        va: usize,
        len: usize,
        access: AccessType,
        mut f: impl FnMut(&PhysMemory, PhysAddr, core::ops::Range<usize>),
    ) -> Result<(), i32> {
        let memory = Arc::clone(self.kernel.memory());
        // 回绕的区间一定越过 KERNBASE，按越界访问处理
        let end = match va.checked_add(len) {
            Some(end) => end,
            None => {
                let code = fault_exit_code(VmError::ProtectionViolation);
                self.exit(code);
                return Err(code);
            }
        };
        let mut start = va;
        while start < end {
            let page_end = (start - start % PAGE_SIZE).saturating_add(PAGE_SIZE).min(end);
            let pa = self.translate_user(VirtAddr::from(start), access)?;
            f(&memory, pa, start - va..page_end - va);
            start = page_end;
        }
        Ok(())
    }
    /// User-mode store of `data` at `va`.
    pub fn store(&self, va: usize, data: &[u8]) -> Result<(), i32> {
        self.user_access(va, data.len(), AccessType::Write, |memory, pa, range| {
            let off = pa.page_offset();
            memory.with_frame_mut(pa.floor(), |bytes| {
                bytes[off..off + range.len()].copy_from_slice(&data[range])
            });
        })
    }
    /// User-mode load of `buf.len()` bytes at `va`.
    pub fn load(&self, va: usize, buf: &mut [u8]) -> Result<(), i32> {
        self.user_access(va, buf.len(), AccessType::Read, |memory, pa, range| {
            let off = pa.page_offset();
            memory.with_frame(pa.floor(), |bytes| {
                buf[range.clone()].copy_from_slice(&bytes[off..off + range.len()])
            });
        })
    }
    /// Kernel read of a NUL-terminated user string. Faults are served but
    /// never kill the process; an unreadable string is an error instead.
    pub fn translated_str(&self, ptr: usize) -> VmResult<String> {
        let mut inner = self.inner_exclusive_access();
        let memory = Arc::clone(self.kernel.memory());
        let mut bytes = Vec::new();
        let mut va = ptr;
        loop {
            let v = VirtAddr::from(va);
            let pte = match inner.memory_set.translate(v.floor()) {
                Some(pte) if pte.user() => pte,
                _ => match inner.memory_set.handle_page_fault(v, AccessType::Read) {
                    FaultOutcome::Resume => continue,
                    FaultOutcome::Terminate(err) => return Err(err),
                },
            };
            let ch = memory.with_frame(pte.ppn(), |page| page[v.page_offset()]);
            if ch == 0 {
                break;
            }
            bytes.push(ch);
            if bytes.len() >= PAGE_SIZE {
                return Err(VmError::InvalidArgument);
            }
            va += 1;
        }
        String::from_utf8(bytes).map_err(|_| VmError::InvalidArgument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::tests::MemFile;
    use crate::kernel::KernelConfig;
    use crate::mm::{Backing, MapPermission, Sharing};

    fn boot(frames: usize) -> Arc<Kernel> {
        Kernel::boot(KernelConfig {
            frames,
            ..KernelConfig::default()
        })
        .unwrap()
    }

    fn anon(process: &Process, len: usize, perm: MapPermission) -> usize {
        process
            .inner_exclusive_access()
            .memory_set
            .mmap(0, len, perm, Sharing::Private, Backing::Anonymous, 0)
            .unwrap()
    }

    #[test]
    fn store_and_load_cross_pages() {
        let kernel = boot(16);
        let process = kernel.spawn().unwrap();
        let addr = anon(&process, 2 * PAGE_SIZE, MapPermission::R | MapPermission::W);
        let data: Vec<u8> = (0..64u8).collect();
        process.store(addr + PAGE_SIZE - 32, &data).unwrap();
        let mut back = [0u8; 64];
        process.load(addr + PAGE_SIZE - 32, &mut back).unwrap();
        assert_eq!(&back[..], &data[..]);
        assert!(!process.is_zombie());
    }

    #[test]
    fn bad_store_kills_the_process() {
        let kernel = boot(16);
        let process = kernel.spawn().unwrap();
        let addr = anon(&process, PAGE_SIZE, MapPermission::R);
        let mut byte = [0u8; 1];
        process.load(addr, &mut byte).unwrap();
        assert_eq!(byte[0], 0);
        assert_eq!(process.store(addr, b"x"), Err(-2));
        assert!(process.is_zombie());
        assert_eq!(process.exit_code(), -2);
        // 进程已退出，之后的访问都直接失败
        assert_eq!(process.load(addr, &mut byte), Err(-2));
        // 数据页已回收，页目录和页表要等进程控制块释放
        assert_eq!(kernel.memory().free_frames(), 14);
        drop(process);
        assert_eq!(kernel.memory().free_frames(), 16);
    }

    #[test]
    fn fork_then_waitpid() {
        let kernel = boot(32);
        let parent = kernel.spawn().unwrap();
        let addr = anon(&parent, PAGE_SIZE, MapPermission::R | MapPermission::W);
        parent.store(addr, b"parent").unwrap();
        let child = parent.fork().unwrap();
        child.store(addr, b"child!").unwrap();
        let mut buf = [0u8; 6];
        parent.load(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");
        child.load(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"child!");

        assert_eq!(parent.waitpid(-1), None);
        child.exit(7);
        child.exit(9);
        assert_eq!(parent.waitpid(child.getpid() as isize), Some((child.getpid(), 7)));
        assert_eq!(parent.waitpid(-1), None);
    }

    #[test]
    fn exit_flushes_shared_file_mappings() {
        let kernel = boot(16);
        let process = kernel.spawn().unwrap();
        let file = MemFile::new(&[b'.'; 32], true);
        let fd = process.open(file.clone()).unwrap();
        assert_eq!(fd, 0);
        let addr = process
            .inner_exclusive_access()
            .memory_set
            .mmap(
                0,
                PAGE_SIZE,
                MapPermission::R | MapPermission::W,
                Sharing::Shared,
                Backing::File(file.clone()),
                0,
            )
            .unwrap();
        process.store(addr, b"hello").unwrap();
        assert_eq!(&file.data.lock()[..5], b".....");
        process.exit(0);
        assert_eq!(&file.data.lock()[..], b"hello...........................");
        assert_eq!(kernel.memory().free_frames(), 14);
    }

    #[test]
    fn descriptor_table_is_bounded() {
        let kernel = boot(4);
        let process = kernel.spawn().unwrap();
        for fd in 0..MAX_FD {
            assert_eq!(process.open(MemFile::new(b"", false)), Ok(fd));
        }
        assert_eq!(
            process.open(MemFile::new(b"", false)),
            Err(VmError::OutOfMemory)
        );
        let mut inner = process.inner_exclusive_access();
        inner.close(3).unwrap();
        assert_eq!(inner.close(3), Err(VmError::BadDescriptor));
        assert_eq!(inner.alloc_fd(FileDescriptor::File(MemFile::new(b"", false))), Ok(3));
    }

    #[test]
    fn translated_str_reads_user_strings() {
        let kernel = boot(8);
        let process = kernel.spawn().unwrap();
        let addr = anon(&process, PAGE_SIZE, MapPermission::R | MapPermission::W);
        process.store(addr, b"/name\0").unwrap();
        assert_eq!(process.translated_str(addr).unwrap(), "/name");
        assert_eq!(
            process.translated_str(0x1000),
            Err(VmError::ProtectionViolation)
        );
        assert!(!process.is_zombie());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn addresses_above_four_gib_do_not_alias() {
        let kernel = boot(8);
        let process = kernel.spawn().unwrap();
        let addr = anon(&process, PAGE_SIZE, MapPermission::R | MapPermission::W);
        process.store(addr, b"/name\0").unwrap();
        let alias = addr + (1 << 32);
        assert_eq!(
            process.translated_str(alias),
            Err(VmError::ProtectionViolation)
        );
        assert!(!process.is_zombie());
        assert_eq!(process.store(alias, b"x"), Err(-2));
        assert!(process.is_zombie());
    }

    #[test]
    fn wrapping_access_is_a_fault() {
        let kernel = boot(8);
        let process = kernel.spawn().unwrap();
        let addr = anon(&process, PAGE_SIZE, MapPermission::R | MapPermission::W);
        let mut buf = [0u8; 2];
        assert_eq!(process.load(usize::MAX, &mut buf), Err(-2));
        assert!(process.is_zombie());
        assert_eq!(process.load(addr, &mut buf), Err(-2));
    }
}
