//! Where the content of a map area comes from: [`Backing`].
use super::{FrameTracker, PhysMemory, PhysPageNum, ShmHandle};
use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};
use crate::fs::File;
use alloc::sync::Arc;

/// data source of a map area
#[derive(Clone)]
pub enum Backing {
    /// zero-filled on demand, private to the area
    Anonymous,
    /// read through from a file, written back when shared and writable
    File(Arc<dyn File>),
    /// a registry object, frames owned by the registry
    Shared(ShmHandle),
}

/// A materialized page of an area.
pub enum PageFrame {
    /// frame allocated for this area alone
    Owned(FrameTracker),
    /// frame owned by the shared-memory registry
    Borrowed(PhysPageNum),
}

impl PageFrame {
    pub fn ppn(&self) -> PhysPageNum {
        match self {
            PageFrame::Owned(frame) => frame.ppn,
            PageFrame::Borrowed(ppn) => *ppn,
        }
    }
}

impl Backing {
    /// Whether two backings name the same underlying object.
    pub fn same_object(&self, other: &Self) -> bool {
        match (self, other) {
            (Backing::Anonymous, Backing::Anonymous) => true,
            (Backing::File(a), Backing::File(b)) => {
                Arc::as_ptr(a) as *const u8 == Arc::as_ptr(b) as *const u8
            }
            (Backing::Shared(a), Backing::Shared(b)) => a == b,
            _ => false,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Backing::Anonymous)
    }

    /// Content of page `page` of the object, counted from its start.
    ///
    /// File pages past end-of-file are zero; shared pages past the object
    /// size do not exist and fault as a protection violation.
    pub fn read_page(&self, memory: &Arc<PhysMemory>, page: usize) -> VmResult<PageFrame> {
        match self {
            Backing::Anonymous => memory
                .alloc()
                .map(PageFrame::Owned)
                .ok_or(VmError::OutOfMemory),
            Backing::File(file) => {
                let frame = memory.alloc().ok_or(VmError::OutOfMemory)?;
                let offset = page * PAGE_SIZE;
                let size = file.size();
                if offset < size {
                    let len = PAGE_SIZE.min(size - offset);
                    memory.with_frame_mut(frame.ppn, |bytes| file.read_at(offset, &mut bytes[..len]));
                }
                Ok(PageFrame::Owned(frame))
            }
            Backing::Shared(handle) => handle
                .frame(page)?
                .map(PageFrame::Borrowed)
                .ok_or(VmError::ProtectionViolation),
        }
    }

    /// Push frame `ppn` back as page `page` of the object.
    ///
    /// Only files need it: the bytes up to end-of-file are written, the
    /// zero padding of the last page never is.
    pub fn write_back_page(&self, memory: &PhysMemory, page: usize, ppn: PhysPageNum) {
        if let Backing::File(file) = self {
            let offset = page * PAGE_SIZE;
            let size = file.size();
            if offset >= size {
                return;
            }
            let len = PAGE_SIZE.min(size - offset);
            let written = memory.with_frame(ppn, |bytes| file.write_at(offset, &bytes[..len]));
            if written != len {
                warn!(
                    "[mm] short write-back at {:#x}: {} of {} bytes",
                    offset, written, len
                );
            }
        }
    }
}
