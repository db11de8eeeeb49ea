//! File collaborator interface and per-process descriptors
//!
//! The VM core never owns a file system. It reads and writes files through
//! the positioned [`File`] interface below, supplied by whoever hosts the
//! kernel.
use crate::mm::ShmHandle;
use alloc::sync::Arc;
use bitflags::*;

/// A file the VM core can map: positioned reads and writes only.
// Send + Sync：同一个文件可能同时被多个地址空间映射
pub trait File: Send + Sync {
    /// If readable
    fn readable(&self) -> bool;
    /// If writable
    fn writable(&self) -> bool;
    /// Read at most `buf.len()` bytes at `offset`, returns bytes read
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize;
    /// Write `buf` at `offset`, returns bytes written
    fn write_at(&self, offset: usize, buf: &[u8]) -> usize;
    /// Current length in bytes
    fn size(&self) -> usize;
}

bitflags! {
    ///Open file flags
    pub struct OpenFlags: u32 {
        ///Read only
        const RDONLY = 0;
        ///Write only
        const WRONLY = 1 << 0;
        ///Read & Write
        const RDWR = 1 << 1;
        ///Allow create
        const CREATE = 1 << 9;
        ///Clear file and return an empty one
        const TRUNC = 1 << 10;
    }
}

impl OpenFlags {
    /// Return (readable, writable)
    pub fn read_write(&self) -> (bool, bool) {
        if self.contains(Self::WRONLY) {
            (false, true)
        } else if self.contains(Self::RDWR) {
            (true, true)
        } else {
            (true, false)
        }
    }
}

/// One slot of a process descriptor table.
#[derive(Clone)]
pub enum FileDescriptor {
    /// a regular file handed in by the host
    File(Arc<dyn File>),
    /// a shared-memory object opened through `shm_open`
    Shm { handle: ShmHandle, writable: bool },
}

impl FileDescriptor {
    pub fn readable(&self) -> bool {
        match self {
            FileDescriptor::File(file) => file.readable(),
            FileDescriptor::Shm { .. } => true,
        }
    }
    pub fn writable(&self) -> bool {
        match self {
            FileDescriptor::File(file) => file.writable(),
            FileDescriptor::Shm { writable, .. } => *writable,
        }
    }
}
