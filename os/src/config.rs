//! Constants used in the VM core

/// 页面大小为 4KiB
pub const PAGE_SIZE: usize = 0x1000;
/// 页内偏移的位宽
pub const PAGE_SIZE_BITS: usize = 0xc;

/// # directory entries per page directory
pub const NPDENTRIES: usize = 1024;
/// # PTEs per page table
pub const NPTENTRIES: usize = 1024;

/// 用户地址空间止于 KERNBASE，其上为内核保留区域
pub const KERNBASE: usize = 0x8000_0000;

/// mmap(0, ..) 在 [MMAP_BASE, MMAP_TOP) 中按地址从低到高寻找空洞
pub const MMAP_BASE: usize = 0x4000_0000;
pub const MMAP_TOP: usize = KERNBASE;

/// first physical address handed out by the frame allocator
pub const MEMORY_START: usize = 0x0010_0000;
/// 4 MiB of simulated physical memory
pub const DEFAULT_MEMORY_FRAMES: usize = 1024;

/// per-process open file table size
pub const MAX_FD: usize = 16;
pub const SHM_NAME_MAX: usize = 64;
