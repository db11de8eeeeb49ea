//! Implementation of [`MapArea`] and [`MemorySet`].
//!
//! A `MemorySet` is one address space: a page table plus an ordered set of
//! non-overlapping map areas. Areas are created by `mmap` without touching
//! physical memory; frames arrive one at a time through the page-fault path.
use super::backing::{Backing, PageFrame};
use super::{PTEFlags, PageTable, PageTableEntry, PhysMemory};
use super::{ShmHandle, ShmId};
use super::{VPNRange, VirtAddr, VirtPageNum};
use crate::config::{KERNBASE, PAGE_SIZE};
use crate::error::{VmError, VmResult};
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::Arc;
use alloc::vec::Vec;

bitflags! {
    /// map permission of an area, bit-compatible with `PROT_*`
    pub struct MapPermission: u8 {
        const R = 1 << 0;
        const W = 1 << 1;
        const X = 1 << 2;
    }
}

/// whether writes reach the backing object
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Sharing {
    Private,
    Shared,
}

/// memory set structure, controls virtual-memory space
pub struct MemorySet {
    page_table: PageTable,
    // 以起始虚拟页号为键，逻辑段两两不相交
    areas: BTreeMap<VirtPageNum, MapArea>,
    // 本地址空间持有映射引用的共享内存对象，每个对象只计一次
    shm_refs: BTreeMap<ShmId, ShmHandle>,
    mmap_window: VPNRange,
}

fn page_aligned(v: usize) -> bool {
    v % PAGE_SIZE == 0
}

impl MemorySet {
    /// An empty address space. `mmap(0, ..)` places areas inside `mmap_window`.
    pub fn new_bare(memory: &Arc<PhysMemory>, mmap_window: VPNRange) -> VmResult<Self> {
        Ok(Self {
            page_table: PageTable::new(memory)?,
            areas: BTreeMap::new(),
            shm_refs: BTreeMap::new(),
            mmap_window,
        })
    }
    pub fn token(&self) -> usize {
        self.page_table.token()
    }
    pub fn memory(&self) -> &Arc<PhysMemory> {
        self.page_table.memory()
    }
    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.page_table.translate(vpn)
    }
    /// areas in address order
    pub fn areas(&self) -> impl Iterator<Item = &MapArea> {
        self.areas.values()
    }
    /// Area containing `vpn`.
    pub fn find_area(&self, vpn: VirtPageNum) -> Option<&MapArea> {
        self.areas
            .range(..=vpn)
            .next_back()
            .map(|(_, area)| area)
            .filter(|area| area.vpn_range.contains(vpn))
    }
    pub(super) fn area_and_table(
        &mut self,
        vpn: VirtPageNum,
    ) -> Option<(&mut MapArea, &mut PageTable)> {
        let area = self
            .areas
            .range_mut(..=vpn)
            .next_back()
            .map(|(_, area)| area)
            .filter(|area| area.vpn_range.contains(vpn))?;
        Some((area, &mut self.page_table))
    }
    fn overlaps(&self, start: VirtPageNum, end: VirtPageNum) -> bool {
        // 逻辑段有序且互不相交，起点在 end 之前的最后一个逻辑段终点最大
        self.areas
            .range(..end)
            .next_back()
            .map_or(false, |(_, area)| area.vpn_range.get_end() > start)
    }
    /// Lowest `pages`-page gap inside the mmap window.
    fn find_free_range(&self, pages: usize) -> Option<VirtPageNum> {
        let top = self.mmap_window.get_end().0;
        let mut cursor = self.mmap_window.get_start().0;
        for area in self.areas.values() {
            let (start, end) = (area.vpn_range.get_start().0, area.vpn_range.get_end().0);
            if end <= cursor {
                continue;
            }
            if start >= cursor + pages {
                break;
            }
            cursor = end;
        }
        (cursor + pages <= top).then(|| VirtPageNum(cursor))
    }
    /// Reserve `[addr, addr + len)` for `backing` starting at byte `offset`.
    ///
    /// `hint == 0` picks the lowest free range of the mmap window, any other
    /// hint is an exact placement. No frame is allocated.
    pub fn mmap(
        &mut self,
        hint: usize,
        len: usize,
        map_perm: MapPermission,
        sharing: Sharing,
        backing: Backing,
        offset: usize,
    ) -> VmResult<usize> {
        if len == 0 || !page_aligned(len) || !page_aligned(offset) {
            return Err(VmError::InvalidArgument);
        }
        if backing.is_anonymous() && sharing == Sharing::Shared {
            return Err(VmError::InvalidArgument);
        }
        let pages = len / PAGE_SIZE;
        let start = if hint == 0 {
            self.find_free_range(pages).ok_or(VmError::OutOfMemory)?
        } else {
            if !page_aligned(hint) {
                return Err(VmError::InvalidArgument);
            }
            match hint.checked_add(len) {
                Some(end) if end <= KERNBASE => {}
                _ => return Err(VmError::Conflict),
            }
            let start = VirtAddr::from(hint).floor();
            if self.overlaps(start, VirtPageNum(start.0 + pages)) {
                return Err(VmError::Conflict);
            }
            start
        };
        if let Backing::Shared(handle) = &backing {
            if !self.shm_refs.contains_key(&handle.id()) {
                handle.map_reference()?;
                self.shm_refs.insert(handle.id(), handle.clone());
            }
        }
        let area = MapArea::new(
            VPNRange::new(start, VirtPageNum(start.0 + pages)),
            map_perm,
            sharing,
            backing,
            offset,
        );
        self.insert_area(area);
        let addr = VirtAddr::from(start).0;
        debug!(
            "[mm] mmap [{:#x}, {:#x}) {:?} {:?}",
            addr,
            addr + len,
            map_perm,
            sharing
        );
        Ok(addr)
    }
    // 插入新的逻辑段，能与相邻逻辑段合并时就合并
    fn insert_area(&mut self, mut area: MapArea) {
        let end = area.vpn_range.get_end();
        let merge_next = self
            .areas
            .get(&end)
            .map_or(false, |next| area.can_merge(next));
        if merge_next {
            if let Some(next) = self.areas.remove(&end) {
                area.absorb(next);
            }
        }
        let start = area.vpn_range.get_start();
        let prev_start = self
            .areas
            .range(..start)
            .next_back()
            .filter(|(_, prev)| prev.can_merge(&area))
            .map(|(key, _)| *key);
        if let Some(prev_start) = prev_start {
            if let Some(mut prev) = self.areas.remove(&prev_start) {
                prev.absorb(area);
                area = prev;
            }
        }
        self.areas.insert(area.vpn_range.get_start(), area);
    }
    /// Page range of `[addr, addr + len)`, the length rounded up to a page.
    fn page_range(addr: usize, len: usize) -> VmResult<VPNRange> {
        if len == 0 || !page_aligned(addr) {
            return Err(VmError::InvalidArgument);
        }
        let end = addr.checked_add(len).ok_or(VmError::InvalidArgument)?;
        if end > KERNBASE {
            return Err(VmError::NotFound);
        }
        Ok(VPNRange::new(
            VirtAddr::from(addr).floor(),
            VirtAddr::from(end).ceil(),
        ))
    }
    /// The first page of `range` must belong to an area. Holes after it
    /// are skipped.
    fn check_covered(&self, range: VPNRange) -> VmResult<()> {
        self.find_area(range.get_start())
            .map(|_| ())
            .ok_or(VmError::NotFound)
    }
    fn overlapping_keys(&self, range: VPNRange) -> Vec<VirtPageNum> {
        self.areas
            .range(..range.get_end())
            .filter(|(_, area)| area.vpn_range.get_end() > range.get_start())
            .map(|(key, _)| *key)
            .collect()
    }
    /// Remove `[addr, addr + len)`. Areas may be trimmed, split or dropped;
    /// resident pages of write-back areas are flushed first.
    pub fn munmap(&mut self, addr: usize, len: usize) -> VmResult<()> {
        let range = Self::page_range(addr, len)?;
        self.check_covered(range)?;
        for key in self.overlapping_keys(range) {
            let mut head = match self.areas.remove(&key) {
                Some(area) => area,
                None => continue,
            };
            let tail = (range.get_end() < head.vpn_range.get_end())
                .then(|| head.split_off(range.get_end()));
            let mut victim = if head.vpn_range.get_start() < range.get_start() {
                let victim = head.split_off(range.get_start());
                self.areas.insert(head.vpn_range.get_start(), head);
                victim
            } else {
                head
            };
            victim.write_back(self.page_table.memory());
            victim.unmap(&mut self.page_table);
            if let Some(tail) = tail {
                self.areas.insert(tail.vpn_range.get_start(), tail);
            }
        }
        self.refresh_shm_refs();
        debug!("[mm] munmap [{:#x}, {:#x})", addr, addr + len);
        Ok(())
    }
    /// Flush resident pages of write-back areas in `[addr, addr + len)`.
    pub fn msync(&self, addr: usize, len: usize) -> VmResult<()> {
        let range = Self::page_range(addr, len)?;
        self.check_covered(range)?;
        let memory = self.page_table.memory();
        for key in self.overlapping_keys(range) {
            if let Some(area) = self.areas.get(&key) {
                area.write_back_range(memory, range);
            }
        }
        debug!("[mm] msync [{:#x}, {:#x})", addr, addr + len);
        Ok(())
    }
    // 释放不再被任何逻辑段引用的共享内存对象
    fn refresh_shm_refs(&mut self) {
        let live: BTreeSet<ShmId> = self
            .areas
            .values()
            .filter_map(|area| match &area.backing {
                Backing::Shared(handle) => Some(handle.id()),
                _ => None,
            })
            .collect();
        let dead: Vec<ShmId> = self
            .shm_refs
            .keys()
            .filter(|id| !live.contains(id))
            .copied()
            .collect();
        for id in dead {
            if let Some(handle) = self.shm_refs.remove(&id) {
                handle.release_reference();
            }
        }
    }
    /// Clone an address space for fork.
    ///
    /// Private areas get copies of their resident pages. Shared areas start
    /// empty in the child: files are flushed first, shared-memory pages
    /// fault back onto the registry frames.
    pub fn from_existed_user(user_space: &Self) -> VmResult<Self> {
        let memory = user_space.memory();
        let mut memory_set = Self::new_bare(memory, user_space.mmap_window)?;
        for area in user_space.areas.values() {
            let mut new_area = MapArea::from_another(area);
            match area.sharing {
                Sharing::Private => {
                    for (vpn, frame) in area.data_frames.iter() {
                        let copy = memory.alloc().ok_or(VmError::OutOfMemory)?;
                        memory.copy_frame(frame.ppn(), copy.ppn);
                        memory_set
                            .page_table
                            .map(*vpn, copy.ppn, new_area.pte_flags())?;
                        new_area.data_frames.insert(*vpn, PageFrame::Owned(copy));
                    }
                }
                Sharing::Shared => area.write_back(memory),
            }
            memory_set
                .areas
                .insert(new_area.vpn_range.get_start(), new_area);
        }
        for (id, handle) in user_space.shm_refs.iter() {
            handle.map_reference()?;
            memory_set.shm_refs.insert(*id, handle.clone());
        }
        Ok(memory_set)
    }
    /// Flush, unmap and drop every area and release shared-memory
    /// references. Page tables stay until the set is dropped.
    pub fn recycle_data_pages(&mut self) {
        let memory = Arc::clone(self.page_table.memory());
        for (_, mut area) in core::mem::take(&mut self.areas) {
            area.write_back(&memory);
            area.unmap(&mut self.page_table);
        }
        self.refresh_shm_refs();
    }
}

impl Drop for MemorySet {
    fn drop(&mut self) {
        self.recycle_data_pages();
    }
}

/// map area structure, controls a contiguous piece of virtual memory
pub struct MapArea {
    vpn_range: VPNRange,
    // 已经通过缺页装入的页面
    data_frames: BTreeMap<VirtPageNum, PageFrame>,
    map_perm: MapPermission,
    sharing: Sharing,
    backing: Backing,
    // 逻辑段起点对应的对象内字节偏移
    offset: usize,
}

impl MapArea {
    pub fn new(
        vpn_range: VPNRange,
        map_perm: MapPermission,
        sharing: Sharing,
        backing: Backing,
        offset: usize,
    ) -> Self {
        Self {
            vpn_range,
            data_frames: BTreeMap::new(),
            map_perm,
            sharing,
            backing,
            offset,
        }
    }
    /// Same range, permission and backing, no resident page.
    pub fn from_another(another: &Self) -> Self {
        Self::new(
            another.vpn_range,
            another.map_perm,
            another.sharing,
            another.backing.clone(),
            another.offset,
        )
    }
    pub fn start_va(&self) -> VirtAddr {
        self.vpn_range.get_start().into()
    }
    pub fn end_va(&self) -> VirtAddr {
        self.vpn_range.get_end().into()
    }
    pub fn permission(&self) -> MapPermission {
        self.map_perm
    }
    pub fn sharing(&self) -> Sharing {
        self.sharing
    }
    pub fn backing(&self) -> &Backing {
        &self.backing
    }
    pub fn offset(&self) -> usize {
        self.offset
    }
    pub fn resident_pages(&self) -> impl Iterator<Item = VirtPageNum> + '_ {
        self.data_frames.keys().copied()
    }
    /// leaf flags for a page of this area, `P` is added by the page table
    pub fn pte_flags(&self) -> PTEFlags {
        if self.map_perm.contains(MapPermission::W) {
            PTEFlags::U | PTEFlags::W
        } else {
            PTEFlags::U
        }
    }
    /// index of `vpn` inside the backing object
    pub fn object_page(&self, vpn: VirtPageNum) -> usize {
        self.offset / PAGE_SIZE + (vpn.0 - self.vpn_range.get_start().0)
    }
    fn byte_len(&self) -> usize {
        (self.vpn_range.get_end().0 - self.vpn_range.get_start().0) * PAGE_SIZE
    }
    /// only shared writable file areas reach their backing object
    pub fn write_back_eligible(&self) -> bool {
        matches!(self.backing, Backing::File(_))
            && self.sharing == Sharing::Shared
            && self.map_perm.contains(MapPermission::W)
    }
    pub(super) fn is_resident(&self, vpn: VirtPageNum) -> bool {
        self.data_frames.contains_key(&vpn)
    }
    /// Materialize and install page `vpn`. Nothing is left behind on failure.
    pub(super) fn map_one(&mut self, page_table: &mut PageTable, vpn: VirtPageNum) -> VmResult<()> {
        let frame = self
            .backing
            .read_page(page_table.memory(), self.object_page(vpn))?;
        page_table.map(vpn, frame.ppn(), self.pte_flags())?;
        trace!("[mm] install {:?} -> {:?}", vpn, frame.ppn());
        self.data_frames.insert(vpn, frame);
        Ok(())
    }
    fn write_back_range(&self, memory: &PhysMemory, range: VPNRange) {
        if !self.write_back_eligible() {
            return;
        }
        for (vpn, frame) in self.data_frames.range(range.get_start()..range.get_end()) {
            self.backing
                .write_back_page(memory, self.object_page(*vpn), frame.ppn());
        }
    }
    fn write_back(&self, memory: &PhysMemory) {
        self.write_back_range(memory, self.vpn_range);
    }
    fn unmap(&mut self, page_table: &mut PageTable) {
        for (vpn, _frame) in core::mem::take(&mut self.data_frames) {
            page_table.unmap(vpn);
        }
    }
    /// Cut the area at `at`, keeping `[start, at)` and returning `[at, end)`.
    fn split_off(&mut self, at: VirtPageNum) -> MapArea {
        let (start, end) = (self.vpn_range.get_start(), self.vpn_range.get_end());
        assert!(start < at && at < end, "split {:?} outside area", at);
        let tail = MapArea {
            vpn_range: VPNRange::new(at, end),
            data_frames: self.data_frames.split_off(&at),
            map_perm: self.map_perm,
            sharing: self.sharing,
            backing: self.backing.clone(),
            offset: self.offset + (at.0 - start.0) * PAGE_SIZE,
        };
        self.vpn_range = VPNRange::new(start, at);
        tail
    }
    fn can_merge(&self, next: &MapArea) -> bool {
        self.vpn_range.get_end() == next.vpn_range.get_start()
            && self.map_perm == next.map_perm
            && self.sharing == next.sharing
            && self.backing.same_object(&next.backing)
            && (self.backing.is_anonymous() || self.offset + self.byte_len() == next.offset)
    }
    fn absorb(&mut self, mut next: MapArea) {
        self.vpn_range = VPNRange::new(self.vpn_range.get_start(), next.vpn_range.get_end());
        self.data_frames.append(&mut next.data_frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MMAP_BASE, MMAP_TOP};
    use crate::fs::tests::MemFile;
    use crate::fs::File;
    use crate::mm::ShmRegistry;

    fn window() -> VPNRange {
        VPNRange::new(
            VirtAddr::from(MMAP_BASE).floor(),
            VirtAddr::from(MMAP_TOP).floor(),
        )
    }

    fn space(frames: usize) -> MemorySet {
        let memory = PhysMemory::new(frames);
        MemorySet::new_bare(&memory, window()).unwrap()
    }

    fn anon(ms: &mut MemorySet, hint: usize, len: usize) -> VmResult<usize> {
        ms.mmap(
            hint,
            len,
            MapPermission::R | MapPermission::W,
            Sharing::Private,
            Backing::Anonymous,
            0,
        )
    }

    fn touch(ms: &mut MemorySet, addr: usize) {
        let vpn = VirtAddr::from(addr).floor();
        let (area, pt) = ms.area_and_table(vpn).unwrap();
        area.map_one(pt, vpn).unwrap();
    }

    fn bounds(ms: &MemorySet) -> Vec<(usize, usize)> {
        ms.areas().map(|a| (a.start_va().0, a.end_va().0)).collect()
    }

    #[test]
    fn rejects_bad_lengths() {
        let mut ms = space(4);
        assert_eq!(anon(&mut ms, 0, 0), Err(VmError::InvalidArgument));
        assert_eq!(anon(&mut ms, 0, 0x1337), Err(VmError::InvalidArgument));
        assert_eq!(anon(&mut ms, 0x1234, 0x1000), Err(VmError::InvalidArgument));
        assert_eq!(ms.areas().count(), 0);
    }

    #[test]
    fn first_fit_from_window_base() {
        let mut ms = space(4);
        let a = anon(&mut ms, 0, 0x4000).unwrap();
        assert_eq!(a, MMAP_BASE);
        let b = ms
            .mmap(0, 0x1000, MapPermission::R, Sharing::Private, Backing::Anonymous, 0)
            .unwrap();
        assert_eq!(b, MMAP_BASE + 0x4000);
        ms.munmap(a, 0x2000).unwrap();
        assert_eq!(anon(&mut ms, 0, 0x2000), Ok(MMAP_BASE));
        assert_eq!(anon(&mut ms, 0, 0x3000), Ok(MMAP_BASE + 0x5000));
    }

    #[test]
    fn fixed_hint_is_exact_or_conflicts() {
        let mut ms = space(4);
        assert_eq!(anon(&mut ms, 0x00f0_0000, 0xf000), Ok(0x00f0_0000));
        assert_eq!(anon(&mut ms, 0x00f0_e000, 0x2000), Err(VmError::Conflict));
        assert_eq!(anon(&mut ms, KERNBASE - 0x1000, 0x2000), Err(VmError::Conflict));
        assert_eq!(anon(&mut ms, 0x00f0_f000, 0x1000), Ok(0x00f0_f000));
    }

    #[test]
    fn adjacent_compatible_areas_merge() {
        let mut ms = space(4);
        anon(&mut ms, 0x10_0000, 0x1000).unwrap();
        anon(&mut ms, 0x10_2000, 0x1000).unwrap();
        anon(&mut ms, 0x10_1000, 0x1000).unwrap();
        assert_eq!(bounds(&ms), [(0x10_0000, 0x10_3000)]);
        ms.mmap(0x10_3000, 0x1000, MapPermission::R, Sharing::Private, Backing::Anonymous, 0)
            .unwrap();
        assert_eq!(ms.areas().count(), 2);
    }

    #[test]
    fn file_areas_merge_only_when_offsets_follow() {
        let mut ms = space(4);
        let file: Arc<dyn crate::fs::File> = MemFile::new(&[0u8; 0x4000], true);
        let rw = MapPermission::R | MapPermission::W;
        ms.mmap(0x10_0000, 0x1000, rw, Sharing::Shared, Backing::File(file.clone()), 0)
            .unwrap();
        ms.mmap(0x10_1000, 0x1000, rw, Sharing::Shared, Backing::File(file.clone()), 0x2000)
            .unwrap();
        assert_eq!(ms.areas().count(), 2);
        ms.mmap(0x10_2000, 0x1000, rw, Sharing::Shared, Backing::File(file), 0x3000)
            .unwrap();
        assert_eq!(bounds(&ms), [(0x10_0000, 0x10_1000), (0x10_1000, 0x10_3000)]);
    }

    #[test]
    fn partial_munmap_splits() {
        let mut ms = space(16);
        let addr = anon(&mut ms, 0x00f0_0000, 0xf000).unwrap();
        touch(&mut ms, addr + 0x4000);
        touch(&mut ms, addr + 0x9000);
        ms.munmap(addr, 0x3000).unwrap();
        // runs past the end of the area
        ms.munmap(addr + 0xe000, 0x2000).unwrap();
        ms.munmap(addr + 0x8000, 0x2000).unwrap();
        assert_eq!(
            bounds(&ms),
            [(0x00f0_3000, 0x00f0_8000), (0x00f0_a000, 0x00f0_e000)]
        );
        assert!(ms.translate(VirtAddr::from(addr + 0x4000).floor()).is_some());
        assert!(ms.translate(VirtAddr::from(addr + 0x9000).floor()).is_none());
        assert_eq!(ms.memory().free_frames(), 16 - 2 - 1);
        assert_eq!(ms.munmap(0x4000, 0x4000), Err(VmError::NotFound));
    }

    #[test]
    fn munmap_needs_a_mapped_start() {
        let mut ms = space(4);
        anon(&mut ms, 0x10_0000, 0x1000).unwrap();
        ms.mmap(0x10_2000, 0x1000, MapPermission::R, Sharing::Private, Backing::Anonymous, 0)
            .unwrap();
        assert_eq!(ms.munmap(0x10_1000, 0x2000), Err(VmError::NotFound));
        assert_eq!(ms.msync(0x10_1000, 0x1000), Err(VmError::NotFound));
        assert_eq!(bounds(&ms), [(0x10_0000, 0x10_1000), (0x10_2000, 0x10_3000)]);
        ms.munmap(0x10_0000, 0x3000).unwrap();
        assert_eq!(ms.areas().count(), 0);
        assert_eq!(ms.munmap(0x10_0001, 0x1000), Err(VmError::InvalidArgument));
    }

    #[test]
    fn munmap_across_areas() {
        let mut ms = space(4);
        anon(&mut ms, 0x10_0000, 0x2000).unwrap();
        ms.mmap(0x10_2000, 0x2000, MapPermission::R, Sharing::Private, Backing::Anonymous, 0)
            .unwrap();
        ms.munmap(0x10_1000, 0x2000).unwrap();
        assert_eq!(bounds(&ms), [(0x10_0000, 0x10_1000), (0x10_3000, 0x10_4000)]);
        assert_eq!(ms.areas().nth(1).unwrap().permission(), MapPermission::R);
    }

    #[test]
    fn msync_and_munmap_write_back_shared_files() {
        let mut ms = space(8);
        let file = MemFile::new(&[b'A'; 128], true);
        let addr = ms
            .mmap(
                0,
                0x1000,
                MapPermission::R | MapPermission::W,
                Sharing::Shared,
                Backing::File(file.clone()),
                0,
            )
            .unwrap();
        touch(&mut ms, addr);
        let ppn = ms.translate(VirtAddr::from(addr).floor()).unwrap().ppn();
        ms.memory().with_frame_mut(ppn, |bytes| bytes[..127].fill(b'B'));
        ms.msync(addr, 0x1000).unwrap();
        assert_eq!(&file.data.lock()[..127], &[b'B'; 127][..]);
        assert_eq!(file.size(), 128);
        ms.memory().with_frame_mut(ppn, |bytes| bytes[0] = b'C');
        ms.munmap(addr, 0x1000).unwrap();
        assert_eq!(file.data.lock()[0], b'C');
    }

    #[test]
    fn private_file_mapping_never_writes_back() {
        let mut ms = space(8);
        let file = MemFile::new(&[b'A'; 16], true);
        let addr = ms
            .mmap(
                0,
                0x1000,
                MapPermission::R | MapPermission::W,
                Sharing::Private,
                Backing::File(file.clone()),
                0,
            )
            .unwrap();
        touch(&mut ms, addr);
        let ppn = ms.translate(VirtAddr::from(addr).floor()).unwrap().ppn();
        ms.memory().with_frame_mut(ppn, |bytes| bytes.fill(b'Z'));
        ms.msync(addr, 0x1000).unwrap();
        drop(ms);
        assert_eq!(*file.data.lock(), [b'A'; 16]);
    }

    #[test]
    fn shm_reference_per_address_space() {
        let memory = PhysMemory::new(16);
        let registry = ShmRegistry::new(&memory);
        let shm = registry.open("/seg", true).unwrap();
        shm.truncate(0x3000).unwrap();
        let mut ms = MemorySet::new_bare(&memory, window()).unwrap();
        let rw = MapPermission::R | MapPermission::W;
        let a = ms
            .mmap(0, 0x3000, rw, Sharing::Shared, Backing::Shared(shm.clone()), 0)
            .unwrap();
        ms.mmap(0, 0x1000, MapPermission::R, Sharing::Shared, Backing::Shared(shm.clone()), 0)
            .unwrap();
        assert_eq!(shm.stat(), Ok(1));
        ms.munmap(a + 0x1000, 0x1000).unwrap();
        assert_eq!(shm.stat(), Ok(1));
        let child = MemorySet::from_existed_user(&ms).unwrap();
        assert_eq!(shm.stat(), Ok(2));
        drop(child);
        ms.munmap(a, 0x1000).unwrap();
        ms.munmap(a + 0x2000, 0x1000).unwrap();
        assert_eq!(shm.stat(), Ok(1));
        ms.recycle_data_pages();
        assert_eq!(shm.stat(), Ok(0));
        drop(ms);
        assert_eq!(shm.stat(), Ok(0));
    }

    #[test]
    fn fork_copies_private_pages() {
        let mut ms = space(16);
        let addr = anon(&mut ms, 0, 0x2000).unwrap();
        touch(&mut ms, addr);
        let ppn = ms.translate(VirtAddr::from(addr).floor()).unwrap().ppn();
        ms.memory().with_frame_mut(ppn, |bytes| bytes[7] = 42);
        let child = MemorySet::from_existed_user(&ms).unwrap();
        let child_ppn = child.translate(VirtAddr::from(addr).floor()).unwrap().ppn();
        assert_ne!(ppn, child_ppn);
        assert_eq!(child.memory().with_frame(child_ppn, |bytes| bytes[7]), 42);
        assert!(child.translate(VirtAddr::from(addr + 0x1000).floor()).is_none());
        assert_eq!(bounds(&child), bounds(&ms));
    }

    #[test]
    fn teardown_returns_every_frame() {
        let memory = PhysMemory::new(16);
        {
            let mut ms = MemorySet::new_bare(&memory, window()).unwrap();
            let addr = anon(&mut ms, 0, 0x4000).unwrap();
            touch(&mut ms, addr);
            touch(&mut ms, addr + 0x3000);
            ms.recycle_data_pages();
            ms.recycle_data_pages();
            assert_eq!(ms.areas().count(), 0);
        }
        assert_eq!(memory.free_frames(), 16);
    }
}
