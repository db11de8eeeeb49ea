//! Implementation of [`PageTableEntry`] and [`PageTable`].
//!
//! Two-level x86 layout: a page directory of 1024 entries, each pointing at
//! a page table of 1024 entries. Entries are 32-bit little-endian words kept
//! inside the frames of [`PhysMemory`].
use super::address::{pte_at, set_pte_at};
use super::{FrameTracker, PhysAddr, PhysMemory, PhysPageNum, VirtAddr, VirtPageNum};
use crate::config::{NPTENTRIES, PAGE_SIZE};
use crate::error::{VmError, VmResult};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use bitflags::*;

// P(Present)：仅当位 P 为 1 时，页表项才是合法的；
// W(Writable)：为 0 时用户态写该页面会触发 Page Fault；
// U(User)：控制用户态能否访问该页面；
// PS(Page Size)：仅在页目录项中有意义，置 1 时该目录项直接映射一个 4MiB 大页
bitflags! {
    /// page table entry flags
    pub struct PTEFlags: u32 {
        const P = 1 << 0;
        const W = 1 << 1;
        const U = 1 << 2;
        const PS = 1 << 7;
    }
}

const PTE_ADDR_MASK: u32 = !0xfff;

#[derive(Copy, Clone, PartialEq, Eq)]
#[repr(C)]
/// page table entry structure
pub struct PageTableEntry {
    pub bits: u32,
}

impl PageTableEntry {
    pub fn new(ppn: PhysPageNum, flags: PTEFlags) -> Self {
        let pa: PhysAddr = ppn.into();
        PageTableEntry {
            bits: (pa.0 as u32 & PTE_ADDR_MASK) | flags.bits(),
        }
    }
    pub fn empty() -> Self {
        PageTableEntry { bits: 0 }
    }
    pub fn ppn(&self) -> PhysPageNum {
        PhysAddr::from((self.bits & PTE_ADDR_MASK) as usize).floor()
    }
    pub fn flags(&self) -> PTEFlags {
        PTEFlags::from_bits_truncate(self.bits & !PTE_ADDR_MASK)
    }
    pub fn is_present(&self) -> bool {
        self.flags().contains(PTEFlags::P)
    }
    pub fn writable(&self) -> bool {
        self.flags().contains(PTEFlags::W)
    }
    pub fn user(&self) -> bool {
        self.flags().contains(PTEFlags::U)
    }
    pub fn is_large(&self) -> bool {
        self.flags().contains(PTEFlags::PS)
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!(
            "PTE:{:#010x}({:?})",
            self.bits & PTE_ADDR_MASK,
            self.flags()
        ))
    }
}

/// location of one leaf entry: the page-table page holding it and its index
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PteSlot {
    pub table: PhysPageNum,
    pub index: usize,
}

/// page table structure
pub struct PageTable {
    root_ppn: PhysPageNum,
    // 页目录以及所有页表所在的物理页帧，生命周期绑定到 PageTable 上，PageTable 被回收时这些页帧也随之回收
    frames: Vec<FrameTracker>,
    memory: Arc<PhysMemory>,
}

impl PageTable {
    /// Allocate an empty page directory.
    pub fn new(memory: &Arc<PhysMemory>) -> VmResult<Self> {
        let frame = memory.alloc().ok_or(VmError::OutOfMemory)?;
        Ok(PageTable {
            root_ppn: frame.ppn,
            frames: vec![frame],
            memory: Arc::clone(memory),
        })
    }
    pub fn memory(&self) -> &Arc<PhysMemory> {
        &self.memory
    }
    fn read(&self, slot: PteSlot) -> PageTableEntry {
        self.memory
            .with_frame(slot.table, |bytes| pte_at(bytes, slot.index))
    }
    fn write(&self, slot: PteSlot, pte: PageTableEntry) {
        self.memory
            .with_frame_mut(slot.table, |bytes| set_pte_at(bytes, slot.index, pte));
    }
    // 找到一个虚拟页号对应的页表项位置，如果页目录项尚未指向一个页表则新建一个
    fn find_pte_create(&mut self, vpn: VirtPageNum) -> VmResult<PteSlot> {
        let [pdx, ptx] = vpn.indexes().ok_or(VmError::InvalidArgument)?;
        let dir = PteSlot {
            table: self.root_ppn,
            index: pdx,
        };
        let pde = self.read(dir);
        if pde.is_present() {
            if pde.is_large() {
                return Err(VmError::Conflict);
            }
            return Ok(PteSlot {
                table: pde.ppn(),
                index: ptx,
            });
        }
        let frame = self.memory.alloc().ok_or(VmError::OutOfMemory)?;
        // 页目录项放开所有权限，真正的访问控制由叶子页表项决定
        self.write(
            dir,
            PageTableEntry::new(frame.ppn, PTEFlags::P | PTEFlags::W | PTEFlags::U),
        );
        let table = frame.ppn;
        self.frames.push(frame);
        trace!("page table for pdx {:#x} at {:?}", pdx, table);
        Ok(PteSlot { table, index: ptx })
    }
    fn find_pte(&self, vpn: VirtPageNum) -> Option<PteSlot> {
        let [pdx, ptx] = vpn.indexes()?;
        let pde = self.read(PteSlot {
            table: self.root_ppn,
            index: pdx,
        });
        if !pde.is_present() || pde.is_large() {
            return None;
        }
        Some(PteSlot {
            table: pde.ppn(),
            index: ptx,
        })
    }
    /// Locate the leaf slot of `vpn`, creating the page table on demand when
    /// `allocate` is set. `Ok(None)` means the table is missing and was not
    /// created. Pages past the 32-bit linear space are rejected.
    pub fn walk(&mut self, vpn: VirtPageNum, allocate: bool) -> VmResult<Option<PteSlot>> {
        if allocate {
            self.find_pte_create(vpn).map(Some)
        } else {
            Ok(self.find_pte(vpn))
        }
    }
    /// Install `vpn -> ppn`. The page must not be mapped already.
    pub fn map(&mut self, vpn: VirtPageNum, ppn: PhysPageNum, flags: PTEFlags) -> VmResult<()> {
        let slot = self
            .walk(vpn, true)?
            .ok_or(VmError::OutOfMemory)?;
        assert!(
            !self.read(slot).is_present(),
            "vpn {:?} is mapped before mapping",
            vpn
        );
        self.write(slot, PageTableEntry::new(ppn, flags | PTEFlags::P));
        Ok(())
    }
    /// Clear the entry of `vpn`, returning it if it was present.
    pub fn unmap(&mut self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        let slot = self.walk(vpn, false).ok().flatten()?;
        let pte = self.read(slot);
        if !pte.is_present() {
            return None;
        }
        self.write(slot, PageTableEntry::empty());
        Some(pte)
    }
    /// Present leaf entry of `vpn`. A 4MiB directory entry is resolved to
    /// the 4KiB page inside it.
    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        let [pdx, ptx] = vpn.indexes()?;
        let pde = self.read(PteSlot {
            table: self.root_ppn,
            index: pdx,
        });
        if !pde.is_present() {
            return None;
        }
        if pde.is_large() {
            let base = pde.ppn().0 & !(NPTENTRIES - 1);
            return Some(PageTableEntry::new(
                PhysPageNum(base + ptx),
                pde.flags() - PTEFlags::PS,
            ));
        }
        let pte = self.read(PteSlot {
            table: pde.ppn(),
            index: ptx,
        });
        pte.is_present().then_some(pte)
    }
    pub fn translate_va(&self, va: VirtAddr) -> Option<PhysAddr> {
        self.translate(va.floor()).map(|pte| {
            let aligned_pa: PhysAddr = pte.ppn().into();
            PhysAddr::from(aligned_pa.0 + va.page_offset())
        })
    }
    /// CR3 value of this address space
    pub fn token(&self) -> usize {
        PhysAddr::from(self.root_ppn).0
    }
    /// number of frames holding the directory and its tables
    pub fn table_frames(&self) -> usize {
        self.frames.len()
    }
}

const _: () = assert!(NPTENTRIES * 4 == PAGE_SIZE);
