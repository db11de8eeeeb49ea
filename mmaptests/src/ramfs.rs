//! An in-memory file system standing in for the disk: flat paths, whole
//! files in a `Vec<u8>`. Enough to back file mappings.
use spin::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use vmos::fs::{File, OpenFlags};

/// file contents shared by every open of the same path
pub struct Inode {
    data: Mutex<Vec<u8>>,
}

/// An opened file: access mode plus a sequential offset for
/// `read`/`write`. Positioned access ignores the offset.
pub struct OpenFile {
    readable: bool,
    writable: bool,
    inner: Mutex<OpenFileInner>,
}

struct OpenFileInner {
    offset: usize,
    inode: Arc<Inode>,
}

impl OpenFile {
    fn new(readable: bool, writable: bool, inode: Arc<Inode>) -> Self {
        Self {
            readable,
            writable,
            inner: Mutex::new(OpenFileInner { offset: 0, inode }),
        }
    }
    /// Sequential read from the current offset.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut inner = self.inner.lock();
        let n = read_inode(&inner.inode, inner.offset, buf);
        inner.offset += n;
        n
    }
    /// Sequential write at the current offset.
    pub fn write(&self, buf: &[u8]) -> usize {
        let mut inner = self.inner.lock();
        let n = write_inode(&inner.inode, inner.offset, buf);
        inner.offset += n;
        n
    }
}

fn read_inode(inode: &Inode, offset: usize, buf: &mut [u8]) -> usize {
    let data = inode.data.lock();
    if offset >= data.len() {
        return 0;
    }
    let n = buf.len().min(data.len() - offset);
    buf[..n].copy_from_slice(&data[offset..offset + n]);
    n
}

fn write_inode(inode: &Inode, offset: usize, buf: &[u8]) -> usize {
    let mut data = inode.data.lock();
    if data.len() < offset + buf.len() {
        data.resize(offset + buf.len(), 0);
    }
    data[offset..offset + buf.len()].copy_from_slice(buf);
    buf.len()
}

impl File for OpenFile {
    fn readable(&self) -> bool {
        self.readable
    }
    fn writable(&self) -> bool {
        self.writable
    }
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        read_inode(&self.inner.lock().inode, offset, buf)
    }
    fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        write_inode(&self.inner.lock().inode, offset, buf)
    }
    fn size(&self) -> usize {
        self.inner.lock().inode.data.lock().len()
    }
}

#[derive(Default)]
pub struct RamFs {
    files: Mutex<BTreeMap<String, Arc<Inode>>>,
}

impl RamFs {
    pub fn new() -> Self {
        Self::default()
    }
    /// Open `path` with the access mode in `flags`, creating it when
    /// `CREATE` is set.
    pub fn open(&self, path: &str, flags: OpenFlags) -> Option<Arc<OpenFile>> {
        let (readable, writable) = flags.read_write();
        let mut files = self.files.lock();
        let inode = match files.get(path) {
            Some(inode) => {
                if flags.contains(OpenFlags::TRUNC) {
                    inode.data.lock().clear();
                }
                Arc::clone(inode)
            }
            None if flags.contains(OpenFlags::CREATE) => {
                let inode = Arc::new(Inode {
                    data: Mutex::new(Vec::new()),
                });
                files.insert(path.to_string(), Arc::clone(&inode));
                inode
            }
            None => return None,
        };
        Some(Arc::new(OpenFile::new(readable, writable, inode)))
    }
    /// Remove the name; open files keep their contents.
    pub fn unlink(&self, path: &str) -> bool {
        self.files.lock().remove(path).is_some()
    }
}
