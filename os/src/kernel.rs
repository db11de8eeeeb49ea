//! The booted machine: physical memory, the shared-memory registry and
//! the boot-time descriptor tables, shared by every process.
use crate::arch::{boot_gdt, Gdt};
use crate::config::{DEFAULT_MEMORY_FRAMES, KERNBASE, MMAP_BASE, MMAP_TOP, PAGE_SIZE};
use crate::error::{VmError, VmResult};
use crate::mm::{PhysMemory, ShmRegistry, VPNRange, VirtAddr};
use crate::task::Process;
use alloc::sync::Arc;

/// runtime knobs of [`Kernel::boot`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// frames of simulated physical memory
    pub frames: usize,
    /// `mmap(0, ..)` searches `[mmap_base, mmap_top)`
    pub mmap_base: usize,
    pub mmap_top: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            frames: DEFAULT_MEMORY_FRAMES,
            mmap_base: MMAP_BASE,
            mmap_top: MMAP_TOP,
        }
    }
}

impl KernelConfig {
    fn validate(&self) -> VmResult<()> {
        let aligned = self.mmap_base % PAGE_SIZE == 0 && self.mmap_top % PAGE_SIZE == 0;
        if self.frames == 0
            || !aligned
            || self.mmap_base == 0
            || self.mmap_base >= self.mmap_top
            || self.mmap_top > KERNBASE
        {
            return Err(VmError::InvalidArgument);
        }
        Ok(())
    }
}

pub struct Kernel {
    memory: Arc<PhysMemory>,
    shm: Arc<ShmRegistry>,
    config: KernelConfig,
    gdt: Gdt,
}

impl Kernel {
    pub fn boot(config: KernelConfig) -> VmResult<Arc<Self>> {
        config.validate()?;
        let memory = PhysMemory::new(config.frames);
        let shm = ShmRegistry::new(&memory);
        info!(
            "[kernel] boot: mmap window [{:#x}, {:#x})",
            config.mmap_base, config.mmap_top
        );
        Ok(Arc::new(Self {
            memory,
            shm,
            config,
            gdt: boot_gdt(),
        }))
    }
    pub fn memory(&self) -> &Arc<PhysMemory> {
        &self.memory
    }
    pub fn shm(&self) -> &Arc<ShmRegistry> {
        &self.shm
    }
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }
    pub fn gdt(&self) -> &Gdt {
        &self.gdt
    }
    pub fn mmap_window(&self) -> VPNRange {
        VPNRange::new(
            VirtAddr::from(self.config.mmap_base).floor(),
            VirtAddr::from(self.config.mmap_top).floor(),
        )
    }
    /// Create a process with an empty address space.
    pub fn spawn(self: &Arc<Self>) -> VmResult<Arc<Process>> {
        Process::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::mmu::SEG_UCODE;

    #[test]
    fn boot_rejects_bad_windows() {
        let bad = [
            KernelConfig {
                frames: 0,
                ..KernelConfig::default()
            },
            KernelConfig {
                mmap_base: 0x1234,
                ..KernelConfig::default()
            },
            KernelConfig {
                mmap_top: KERNBASE + PAGE_SIZE,
                ..KernelConfig::default()
            },
            KernelConfig {
                mmap_base: MMAP_TOP,
                mmap_top: MMAP_BASE,
                ..KernelConfig::default()
            },
        ];
        for config in bad {
            assert_eq!(Kernel::boot(config).err(), Some(VmError::InvalidArgument));
        }
    }

    #[test]
    fn boot_builds_machine() {
        let kernel = Kernel::boot(KernelConfig {
            frames: 32,
            ..KernelConfig::default()
        })
        .unwrap();
        assert_eq!(kernel.memory().total_frames(), 32);
        assert!(kernel.shm().is_empty());
        assert_eq!(kernel.gdt()[SEG_UCODE], 0x00cf_fa00_0000_ffff);
        let process = kernel.spawn().unwrap();
        assert_eq!(kernel.memory().free_frames(), 31);
        drop(process);
        assert_eq!(kernel.memory().free_frames(), 32);
    }
}
