//! Error kinds reported by the VM core
use core::fmt::{self, Display, Formatter};

/// Why a VM operation failed.
///
/// `InvalidArgument`, `NotFound`, `Conflict`, `BadDescriptor` and
/// `PermissionDenied` are returned to the caller as ordinary failures.
/// `ProtectionViolation` and an `OutOfMemory` met while handling a page
/// fault terminate the faulting process instead.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VmError {
    /// misaligned address/length, malformed name, zero-size region
    InvalidArgument,
    /// no mapping / no such shared-memory object
    NotFound,
    /// fixed placement overlaps an existing or reserved range
    Conflict,
    /// no free physical frame or page-table page
    OutOfMemory,
    /// access not permitted by the region
    ProtectionViolation,
    /// descriptor is not open
    BadDescriptor,
    /// descriptor was not opened with the access the mapping needs
    PermissionDenied,
}

impl Display for VmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let msg = match self {
            VmError::InvalidArgument => "invalid argument",
            VmError::NotFound => "no such mapping or object",
            VmError::Conflict => "range conflicts with an existing mapping",
            VmError::OutOfMemory => "out of physical memory",
            VmError::ProtectionViolation => "protection violation",
            VmError::BadDescriptor => "bad file descriptor",
            VmError::PermissionDenied => "permission denied",
        };
        f.write_str(msg)
    }
}

pub type VmResult<T> = Result<T, VmError>;
