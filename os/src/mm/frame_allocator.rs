//! Implementation of [`PhysMemory`] which
//! controls all the frames of the (simulated) physical memory.
use super::{PhysAddr, PhysPageNum};
use crate::config::{MEMORY_START, PAGE_SIZE};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use buddy_system_allocator::FrameAllocator;
use core::fmt::{self, Debug, Formatter};
use spin::Mutex;

/// tracker for physical page frame allocation and deallocation
pub struct FrameTracker {
    /// physical page number
    pub ppn: PhysPageNum,
    memory: Arc<PhysMemory>,
}

impl FrameTracker {
    /// Create a new FrameTracker, the frame is cleared first
    fn new(ppn: PhysPageNum, memory: Arc<PhysMemory>) -> Self {
        // page cleaning
        memory.with_frame_mut(ppn, |bytes| bytes.fill(0));
        Self { ppn, memory }
    }
}

impl Debug for FrameTracker {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("FrameTracker:PPN={:#x}", self.ppn.0))
    }
}

impl Drop for FrameTracker {
    fn drop(&mut self) {
        self.memory.dealloc(self.ppn);
    }
}

// 2^31 个页帧的块足够覆盖 32 位物理地址空间
const BUDDY_ORDER: usize = 32;

struct FramePool {
    allocator: FrameAllocator<BUDDY_ORDER>,
    allocated: usize,
}

/// physical memory: a run of page frames handed out by a buddy allocator
pub struct PhysMemory {
    pool: Mutex<FramePool>,
    // 每个物理页帧各自一把锁，共享内存的页帧会被多个地址空间同时访问
    frames: Vec<Mutex<Box<[u8; PAGE_SIZE]>>>,
    start: PhysPageNum,
}

impl PhysMemory {
    /// Bring up `frames` frames of physical memory starting at `MEMORY_START`.
    pub fn new(frames: usize) -> Arc<Self> {
        let start = PhysAddr::from(MEMORY_START).ceil();
        let mut allocator = FrameAllocator::<BUDDY_ORDER>::new();
        allocator.add_frame(start.0, start.0 + frames);
        let frames: Vec<_> = (0..frames)
            .map(|_| Mutex::new(Box::new([0u8; PAGE_SIZE])))
            .collect();
        info!(
            "[kernel] physical memory [{:#x}, {:#x}), {} frames",
            PhysAddr::from(start).0,
            PhysAddr::from(PhysPageNum(start.0 + frames.len())).0,
            frames.len()
        );
        Arc::new(Self {
            pool: Mutex::new(FramePool {
                allocator,
                allocated: 0,
            }),
            frames,
            start,
        })
    }

    /// Allocate a zero-filled frame, `None` once memory is exhausted.
    pub fn alloc(self: &Arc<Self>) -> Option<FrameTracker> {
        let ppn = {
            let mut pool = self.pool.lock();
            let ppn = pool.allocator.alloc(1)?;
            pool.allocated += 1;
            ppn
        };
        trace!("frame alloc {:#x}", ppn);
        Some(FrameTracker::new(PhysPageNum(ppn), Arc::clone(self)))
    }

    fn dealloc(&self, ppn: PhysPageNum) {
        assert!(self.owns(ppn), "Frame ppn={:#x} has not been allocated!", ppn.0);
        let mut pool = self.pool.lock();
        pool.allocator.dealloc(ppn.0, 1);
        pool.allocated -= 1;
    }

    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn free_frames(&self) -> usize {
        self.frames.len() - self.pool.lock().allocated
    }

    /// whether `ppn` names a frame of this memory
    pub fn owns(&self, ppn: PhysPageNum) -> bool {
        ppn.0 >= self.start.0 && ppn.0 < self.start.0 + self.frames.len()
    }

    fn slot(&self, ppn: PhysPageNum) -> &Mutex<Box<[u8; PAGE_SIZE]>> {
        assert!(self.owns(ppn), "{:?} is outside physical memory", ppn);
        &self.frames[ppn.0 - self.start.0]
    }

    /// Run `f` over the bytes of frame `ppn`.
    pub fn with_frame<R>(&self, ppn: PhysPageNum, f: impl FnOnce(&[u8; PAGE_SIZE]) -> R) -> R {
        let frame = self.slot(ppn).lock();
        f(&frame)
    }

    /// Run `f` over the bytes of frame `ppn`, mutably.
    pub fn with_frame_mut<R>(
        &self,
        ppn: PhysPageNum,
        f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R,
    ) -> R {
        let mut frame = self.slot(ppn).lock();
        f(&mut frame)
    }

    /// Copy the whole content of frame `src` into frame `dst`.
    pub fn copy_frame(&self, src: PhysPageNum, dst: PhysPageNum) {
        assert_ne!(src, dst);
        let data = self.with_frame(src, |bytes| *bytes);
        self.with_frame_mut(dst, |bytes| *bytes = data);
    }
}
