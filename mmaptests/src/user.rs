//! The user side of the simulated machine: a process seen through the
//! numeric syscall ABI and user-mode loads and stores.
use std::cell::Cell;
use std::sync::Arc;
use vmos::config::PAGE_SIZE;
use vmos::syscall::*;
use vmos::task::Process;
use vmos::trap::{trap_handler, Trap, TrapOutcome};
use vmos::{Kernel, VmResult};

pub struct User {
    process: Arc<Process>,
    // 存放系统调用字符串参数的页，第一次使用时映射
    scratch: Cell<Option<usize>>,
}

impl User {
    pub fn spawn(kernel: &Arc<Kernel>) -> VmResult<Self> {
        Ok(Self::from_process(kernel.spawn()?))
    }
    fn from_process(process: Arc<Process>) -> Self {
        Self {
            process,
            scratch: Cell::new(None),
        }
    }
    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }
    pub fn pid(&self) -> usize {
        self.process.getpid()
    }

    fn syscall(&self, id: usize, args: [usize; 6]) -> isize {
        match trap_handler(&self.process, Trap::UserEnvCall { id, args }) {
            TrapOutcome::Return(ret) => ret,
            _ => -1,
        }
    }

    pub fn mmap(&self, addr: usize, len: usize, prot: usize, flags: usize, fd: usize, offset: usize) -> isize {
        self.syscall(SYSCALL_MMAP, [addr, len, prot, flags, fd, offset])
    }
    pub fn munmap(&self, addr: usize, len: usize) -> isize {
        self.syscall(SYSCALL_MUNMAP, [addr, len, 0, 0, 0, 0])
    }
    pub fn msync(&self, addr: usize, len: usize) -> isize {
        self.syscall(SYSCALL_MSYNC, [addr, len, 0, 0, 0, 0])
    }
    pub fn close(&self, fd: usize) -> isize {
        self.syscall(SYSCALL_CLOSE, [fd, 0, 0, 0, 0, 0])
    }
    pub fn ftruncate(&self, fd: usize, size: usize) -> isize {
        self.syscall(SYSCALL_FTRUNCATE, [fd, size, 0, 0, 0, 0])
    }
    pub fn shm_open(&self, name: &str, flags: u32) -> isize {
        match self.user_str(name) {
            Some(ptr) => self.syscall(SYSCALL_SHM_OPEN, [ptr, flags as usize, 0, 0, 0, 0]),
            None => -1,
        }
    }
    pub fn shm_unlink(&self, name: &str) -> isize {
        match self.user_str(name) {
            Some(ptr) => self.syscall(SYSCALL_SHM_UNLINK, [ptr, 0, 0, 0, 0, 0]),
            None => -1,
        }
    }
    pub fn shm_stat(&self, fd: usize) -> isize {
        self.syscall(SYSCALL_SHM_STAT, [fd, 0, 0, 0, 0, 0])
    }

    /// Copy `s` with its NUL into the scratch page, return its address.
    fn user_str(&self, s: &str) -> Option<usize> {
        if s.len() >= PAGE_SIZE {
            return None;
        }
        let page = match self.scratch.get() {
            Some(page) => page,
            None => {
                let ret = self.mmap(0, PAGE_SIZE, PROT_READ | PROT_WRITE, MAP_ANONYMOUS, 0, 0);
                if ret == MAP_FAILED {
                    return None;
                }
                self.scratch.set(Some(ret as usize));
                ret as usize
            }
        };
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.store(page, &bytes).ok()?;
        Some(page)
    }

    /// User-mode store. `Err` carries the exit code of the killed process.
    pub fn store(&self, va: usize, data: &[u8]) -> Result<(), i32> {
        self.process.store(va, data)
    }
    pub fn load(&self, va: usize, buf: &mut [u8]) -> Result<(), i32> {
        self.process.load(va, buf)
    }
    pub fn load_byte(&self, va: usize) -> Result<u8, i32> {
        let mut byte = [0u8];
        self.load(va, &mut byte)?;
        Ok(byte[0])
    }

    /// Install an opened host file in the descriptor table.
    pub fn install(&self, file: Arc<dyn vmos::fs::File>) -> isize {
        self.process.open(file).map_or(-1, |fd| fd as isize)
    }

    pub fn fork(&self) -> Option<User> {
        let child = self.process.fork().ok()?;
        Some(User {
            process: child,
            scratch: Cell::new(self.scratch.get()),
        })
    }
    pub fn exit(&self, code: i32) {
        self.process.exit(code);
    }
    /// Reap any exited child.
    pub fn wait(&self) -> Option<(usize, i32)> {
        self.process.waitpid(-1)
    }
    pub fn is_alive(&self) -> bool {
        !self.process.is_zombie()
    }
}
