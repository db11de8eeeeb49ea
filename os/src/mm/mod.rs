//! Memory management implementation
//!
//! x86 two-level page tables over a simulated physical memory, and
//! everything about demand-paged user memory: backing objects, the
//! shared-memory registry, map areas, memory sets and the page-fault path.
//!
//! Every process has a memory_set to control its virtual memory.

mod address;
mod backing;
mod fault;
mod frame_allocator;
mod memory_set;
mod page_table;
mod shm;
mod tests_prop;

pub use address::VPNRange;
pub use address::{PhysAddr, PhysPageNum, VirtAddr, VirtPageNum};
pub use backing::{Backing, PageFrame};
pub use fault::{AccessType, FaultOutcome};
pub use frame_allocator::{FrameTracker, PhysMemory};
pub use memory_set::{MapArea, MapPermission, MemorySet, Sharing};
pub use page_table::{PTEFlags, PageTable, PageTableEntry, PteSlot};
pub use shm::{validate_name, ShmHandle, ShmId, ShmRegistry};
