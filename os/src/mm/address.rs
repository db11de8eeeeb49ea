//! Linear and physical addresses of the 32-bit machine, and their page numbers.
use super::PageTableEntry;
use crate::config::{NPDENTRIES, NPTENTRIES, PAGE_SIZE, PAGE_SIZE_BITS};
use core::fmt::{self, Debug, Formatter};

/// 线性地址 = 10 位目录索引 + 10 位页表索引 + 12 位页内偏移，超出 32 位的虚拟页号不可翻译
const VPN_LIMIT: usize = NPDENTRIES * NPTENTRIES;

/// physical address
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub struct PhysAddr(pub usize);

/// linear (virtual) address, kept unmasked so out-of-range values stay visible
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub struct VirtAddr(pub usize);

/// physical page number
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub struct PhysPageNum(pub usize);

/// virtual page number
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub struct VirtPageNum(pub usize);

impl Debug for VirtAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "VA:{:#x}", self.0)
    }
}
impl Debug for VirtPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "VPN:{:#x}", self.0)
    }
}
impl Debug for PhysAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PA:{:#x}", self.0)
    }
}
impl Debug for PhysPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PPN:{:#x}", self.0)
    }
}

impl From<usize> for PhysAddr {
    fn from(v: usize) -> Self {
        Self(v)
    }
}
impl From<usize> for VirtAddr {
    fn from(v: usize) -> Self {
        Self(v)
    }
}
impl From<VirtPageNum> for VirtAddr {
    fn from(v: VirtPageNum) -> Self {
        Self(v.0 << PAGE_SIZE_BITS)
    }
}
impl From<PhysPageNum> for PhysAddr {
    fn from(v: PhysPageNum) -> Self {
        Self(v.0 << PAGE_SIZE_BITS)
    }
}

impl VirtAddr {
    /// page containing this address
    pub fn floor(&self) -> VirtPageNum {
        VirtPageNum(self.0 >> PAGE_SIZE_BITS)
    }
    /// first page boundary at or above this address
    pub fn ceil(&self) -> VirtPageNum {
        VirtPageNum(self.0.div_ceil(PAGE_SIZE))
    }
    pub fn page_offset(&self) -> usize {
        self.0 % PAGE_SIZE
    }
}

impl PhysAddr {
    pub fn floor(&self) -> PhysPageNum {
        PhysPageNum(self.0 >> PAGE_SIZE_BITS)
    }
    pub fn ceil(&self) -> PhysPageNum {
        PhysPageNum(self.0.div_ceil(PAGE_SIZE))
    }
    pub fn page_offset(&self) -> usize {
        self.0 % PAGE_SIZE
    }
}

impl VirtPageNum {
    /// `[PDX, PTX]` of the page, `None` past the 4GiB linear space
    pub fn indexes(&self) -> Option<[usize; 2]> {
        if self.0 >= VPN_LIMIT {
            return None;
        }
        Some([self.0 / NPTENTRIES, self.0 % NPTENTRIES])
    }
}

/// Decode one little-endian entry of a page-table page.
pub(crate) fn pte_at(bytes: &[u8; PAGE_SIZE], index: usize) -> PageTableEntry {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[index * 4..index * 4 + 4]);
    PageTableEntry {
        bits: u32::from_le_bytes(raw),
    }
}

/// Encode one entry into a page-table page.
pub(crate) fn set_pte_at(bytes: &mut [u8; PAGE_SIZE], index: usize, pte: PageTableEntry) {
    bytes[index * 4..index * 4 + 4].copy_from_slice(&pte.bits.to_le_bytes());
}

/// half-open range `[start, end)`
#[derive(Copy, Clone)]
pub struct SimpleRange<T: Copy + PartialOrd + Debug> {
    l: T,
    r: T,
}

impl<T: Copy + PartialOrd + Debug> SimpleRange<T> {
    pub fn new(start: T, end: T) -> Self {
        assert!(start <= end, "start {:?} > end {:?}!", start, end);
        Self { l: start, r: end }
    }
    pub fn get_start(&self) -> T {
        self.l
    }
    pub fn get_end(&self) -> T {
        self.r
    }
    pub fn contains(&self, t: T) -> bool {
        self.l <= t && t < self.r
    }
}

/// a simple range structure for virtual page number
pub type VPNRange = SimpleRange<VirtPageNum>;
