//! Segment and gate descriptors of the x86 MMU.
//!
//! These are built once at boot; everything here is a `const fn` over
//! plain integers.

/// Interrupt Enable
pub const FL_IF: u32 = 0x0000_0200;

/// Protection Enable
pub const CR0_PE: u32 = 0x0000_0001;
/// Write Protect
pub const CR0_WP: u32 = 0x0001_0000;
/// Paging
pub const CR0_PG: u32 = 0x8000_0000;
/// Page size extension
pub const CR4_PSE: u32 = 0x0000_0010;

// 段选择子在 GDT 中的下标
pub const SEG_KCODE: usize = 1;
pub const SEG_KDATA: usize = 2;
pub const SEG_UCODE: usize = 3;
pub const SEG_UDATA: usize = 4;
pub const SEG_TSS: usize = 5;
/// number of GDT slots
pub const NSEGS: usize = 6;

pub const DPL_USER: u64 = 0x3;

/// Executable segment
pub const STA_X: u64 = 0x8;
/// Writeable (non-executable segments)
pub const STA_W: u64 = 0x2;
/// Readable (executable segments)
pub const STA_R: u64 = 0x2;

/// Available 32-bit TSS
pub const STS_T32A: u64 = 0x9;
/// 32-bit Interrupt Gate
pub const STS_IG32: u64 = 0xE;
/// 32-bit Trap Gate
pub const STS_TG32: u64 = 0xF;

const SYSTEM_BIT: u64 = 1 << 44;

/// Segment descriptor with a 4KiB-granular 32-bit limit.
pub const fn seg(ty: u64, base: u32, lim: u32, dpl: u64) -> u64 {
    let (base, lim) = (base as u64, lim as u64);
    ((lim >> 12) & 0xffff)
        | (base & 0xffff) << 16
        | ((base >> 16) & 0xff) << 32
        | ty << 40
        | SYSTEM_BIT
        | dpl << 45
        | 1 << 47
        | (lim >> 28) << 48
        | 1 << 54
        | 1 << 55
        | (base >> 24) << 56
}

/// Byte-granular 16-bit-limit variant of [`seg`], used for the TSS.
pub const fn seg16(ty: u64, base: u32, lim: u32, dpl: u64) -> u64 {
    let (base, lim) = (base as u64, lim as u64);
    (lim & 0xffff)
        | (base & 0xffff) << 16
        | ((base >> 16) & 0xff) << 32
        | ty << 40
        | SYSTEM_BIT
        | dpl << 45
        | 1 << 47
        | (lim >> 16) << 48
        | 1 << 54
        | (base >> 24) << 56
}

/// Clear the system bit, turning `seg` into a system descriptor.
pub const fn seg_cls(seg: u64) -> u64 {
    seg & !SYSTEM_BIT
}

/// Interrupt gate (`istrap == false`, clears IF) or trap gate to
/// `sel:off`, callable from privilege `dpl`.
pub const fn gate(istrap: bool, sel: u16, off: u32, dpl: u64) -> u64 {
    let ty = if istrap { STS_TG32 } else { STS_IG32 };
    (off as u64 & 0xffff) | (sel as u64) << 16 | ty << 40 | dpl << 45 | 1 << 47 | ((off as u64) >> 16) << 48
}

/// Selector value for GDT slot `index` at privilege `rpl`.
pub const fn selector(index: usize, rpl: u64) -> u16 {
    ((index << 3) as u64 | rpl) as u16
}

pub type Gdt = [u64; NSEGS];

/// Flat 4GiB code and data segments for kernel and user. The TSS slot is
/// filled per process on context switch and left null here.
pub const fn boot_gdt() -> Gdt {
    let mut gdt = [0u64; NSEGS];
    gdt[SEG_KCODE] = seg(STA_X | STA_R, 0, 0xffff_ffff, 0);
    gdt[SEG_KDATA] = seg(STA_W, 0, 0xffff_ffff, 0);
    gdt[SEG_UCODE] = seg(STA_X | STA_R, 0, 0xffff_ffff, DPL_USER);
    gdt[SEG_UDATA] = seg(STA_W, 0, 0xffff_ffff, DPL_USER);
    gdt
}
