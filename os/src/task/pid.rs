//! Process identifiers: [`PidAllocator`] and the RAII [`PidHandle`].
use alloc::collections::BTreeSet;
use lazy_static::*;
use spin::Mutex;

/// Hands out the lowest free pid, starting at 1.
pub struct PidAllocator {
    // 从未分配过的最小 pid
    next: usize,
    recycled: BTreeSet<usize>,
}

impl PidAllocator {
    pub fn new() -> Self {
        PidAllocator {
            next: 1,
            recycled: BTreeSet::new(),
        }
    }
    pub fn alloc(&mut self) -> PidHandle {
        let pid = match self.recycled.iter().next().copied() {
            Some(pid) => {
                self.recycled.remove(&pid);
                pid
            }
            None => {
                self.next += 1;
                self.next - 1
            }
        };
        PidHandle(pid)
    }
    pub fn dealloc(&mut self, pid: usize) {
        assert!(pid != 0 && pid < self.next, "pid {} was never allocated", pid);
        assert!(self.recycled.insert(pid), "pid {} has been deallocated!", pid);
    }
    /// number of pids currently handed out
    pub fn in_use(&self) -> usize {
        self.next - 1 - self.recycled.len()
    }
}

impl Default for PidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    // 多个内核实例可能在不同线程上同时运行，这里用自旋锁而不是 UPSafeCell
    pub static ref PID_ALLOCATOR: Mutex<PidAllocator> = Mutex::new(PidAllocator::new());
}

/// A pid, returned to [`PID_ALLOCATOR`] on drop.
#[derive(Debug)]
pub struct PidHandle(pub usize);

impl Drop for PidHandle {
    fn drop(&mut self) {
        PID_ALLOCATOR.lock().dealloc(self.0);
    }
}

pub fn pid_alloc() -> PidHandle {
    PID_ALLOCATOR.lock().alloc()
}
