//! Demand paging: the page-fault path of [`MemorySet`].
use super::{MapPermission, MemorySet, VirtAddr};
use crate::config::KERNBASE;
use crate::error::VmError;

/// what the faulting access tried to do
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AccessType {
    Read,
    Write,
    Execute,
}

/// decision returned to the trap dispatcher
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FaultOutcome {
    /// the page is installed, retry the access
    Resume,
    /// kill the faulting process
    Terminate(VmError),
}

impl MapPermission {
    /// Whether an area with this permission admits `access`. There is no
    /// write-only page on x86, so writable implies readable.
    pub fn allows(&self, access: AccessType) -> bool {
        match access {
            AccessType::Read => self.intersects(MapPermission::R | MapPermission::W),
            AccessType::Write => self.contains(MapPermission::W),
            AccessType::Execute => self.contains(MapPermission::X),
        }
    }
}

impl MemorySet {
    /// Handle a fault at `va`: find the owning area, check the access,
    /// materialize exactly one page and install it.
    pub fn handle_page_fault(&mut self, va: VirtAddr, access: AccessType) -> FaultOutcome {
        if va.0 >= KERNBASE {
            warn!("[mm] {:?} fault on kernel address {:?}", access, va);
            return FaultOutcome::Terminate(VmError::ProtectionViolation);
        }
        let vpn = va.floor();
        // Lookup
        let (area, page_table) = match self.area_and_table(vpn) {
            Some(found) => found,
            None => {
                warn!("[mm] {:?} fault on unmapped {:?}", access, va);
                return FaultOutcome::Terminate(VmError::ProtectionViolation);
            }
        };
        // PermissionCheck
        if !area.permission().allows(access) {
            warn!(
                "[mm] {:?} fault on {:?} denied by {:?}",
                access,
                va,
                area.permission()
            );
            return FaultOutcome::Terminate(VmError::ProtectionViolation);
        }
        if area.is_resident(vpn) {
            // 页面已装入且权限足够，多半是陈旧的转换，直接返回重试
            return FaultOutcome::Resume;
        }
        // Materialize + Install
        match area.map_one(page_table, vpn) {
            Ok(()) => FaultOutcome::Resume,
            Err(err) => {
                warn!("[mm] cannot page in {:?}: {}", va, err);
                FaultOutcome::Terminate(err)
            }
        }
    }
}
