//! Named shared-memory objects: [`ShmRegistry`] and [`ShmHandle`].
//!
//! The registry owns the frames of every object. Address spaces only hold
//! handles and take a mapper reference while at least one of their areas
//! is backed by the object.
use super::{FrameTracker, PhysMemory, PhysPageNum};
use crate::config::{PAGE_SIZE, SHM_NAME_MAX};
use crate::error::{VmError, VmResult};
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::{self, Debug, Formatter};
use spin::Mutex;

/// identity of a shared-memory object, never reused within one registry
pub type ShmId = usize;

struct ShmObject {
    name: String,
    size: usize,
    pages: BTreeMap<usize, FrameTracker>,
    // 映射该对象的地址空间数量
    mappers: usize,
    unlinked: bool,
    // 缩小时被截掉的页帧，可能仍被某些页表引用，等到 mappers 归零再释放
    retired: Vec<FrameTracker>,
}

impl ShmObject {
    fn reclaimable(&self) -> bool {
        self.unlinked && self.mappers == 0
    }
}

struct RegistryInner {
    names: BTreeMap<String, ShmId>,
    objects: BTreeMap<ShmId, ShmObject>,
    next_id: ShmId,
}

/// Process-wide table from names to shared-memory objects.
///
/// One lock guards the whole table including every mapper count. It is
/// always taken before the frame pool lock.
pub struct ShmRegistry {
    memory: Arc<PhysMemory>,
    inner: Mutex<RegistryInner>,
}

/// `/` followed by one non-empty segment without further slashes.
pub fn validate_name(name: &str) -> VmResult<()> {
    match name.strip_prefix('/') {
        Some(segment)
            if !segment.is_empty() && !segment.contains('/') && name.len() <= SHM_NAME_MAX =>
        {
            Ok(())
        }
        _ => Err(VmError::InvalidArgument),
    }
}

impl ShmRegistry {
    pub fn new(memory: &Arc<PhysMemory>) -> Arc<Self> {
        Arc::new(Self {
            memory: Arc::clone(memory),
            inner: Mutex::new(RegistryInner {
                names: BTreeMap::new(),
                objects: BTreeMap::new(),
                next_id: 1,
            }),
        })
    }

    /// Find the object called `name`, creating an empty one if `create`.
    pub fn open(self: &Arc<Self>, name: &str, create: bool) -> VmResult<ShmHandle> {
        validate_name(name)?;
        let mut inner = self.inner.lock();
        let id = match inner.names.get(name) {
            Some(id) => *id,
            None if create => {
                let id = inner.next_id;
                inner.next_id += 1;
                inner.names.insert(name.to_string(), id);
                inner.objects.insert(
                    id,
                    ShmObject {
                        name: name.to_string(),
                        size: 0,
                        pages: BTreeMap::new(),
                        mappers: 0,
                        unlinked: false,
                        retired: Vec::new(),
                    },
                );
                info!("[shm] create {} as #{}", name, id);
                id
            }
            None => return Err(VmError::NotFound),
        };
        Ok(ShmHandle {
            id,
            registry: Arc::clone(self),
        })
    }

    /// Drop the name at once. The object goes away with its last mapper.
    pub fn unlink(&self, name: &str) -> VmResult<()> {
        validate_name(name)?;
        let mut inner = self.inner.lock();
        let id = inner.names.remove(name).ok_or(VmError::NotFound)?;
        let reclaim = match inner.objects.get_mut(&id) {
            Some(object) => {
                object.unlinked = true;
                object.reclaimable()
            }
            None => false,
        };
        info!("[shm] unlink {} (#{})", name, id);
        if reclaim {
            Self::reclaim(&mut inner, id);
        }
        Ok(())
    }

    /// number of objects still alive, named or not
    pub fn len(&self) -> usize {
        self.inner.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reclaim(inner: &mut RegistryInner, id: ShmId) {
        if let Some(object) = inner.objects.remove(&id) {
            info!(
                "[shm] reclaim #{} ({}), {} frames",
                id,
                object.name,
                object.pages.len() + object.retired.len()
            );
        }
    }

    fn with_object<R>(&self, id: ShmId, f: impl FnOnce(&mut ShmObject) -> R) -> VmResult<R> {
        let mut inner = self.inner.lock();
        inner.objects.get_mut(&id).map(f).ok_or(VmError::NotFound)
    }
}

/// A reference to one shared-memory object. Stale once the object is
/// reclaimed: every operation then fails with `NotFound`.
#[derive(Clone)]
pub struct ShmHandle {
    id: ShmId,
    registry: Arc<ShmRegistry>,
}

impl Debug for ShmHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("ShmHandle(#{})", self.id))
    }
}

impl PartialEq for ShmHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.registry, &other.registry)
    }
}

impl Eq for ShmHandle {}

impl ShmHandle {
    pub fn id(&self) -> ShmId {
        self.id
    }

    /// Resize to `size` rounded up to a page. Growth is zero-filled and
    /// allocated at once; on exhaustion the old size is kept.
    pub fn truncate(&self, size: usize) -> VmResult<()> {
        let pages = size
            .checked_add(PAGE_SIZE - 1)
            .ok_or(VmError::OutOfMemory)?
            / PAGE_SIZE;
        let memory = &self.registry.memory;
        self.registry.with_object(self.id, |object| {
            let old = object.size / PAGE_SIZE;
            if pages > old {
                if pages - old > memory.free_frames() {
                    return Err(VmError::OutOfMemory);
                }
                let mut fresh = Vec::with_capacity(pages - old);
                for _ in old..pages {
                    // 分配失败时 fresh 被丢弃，已分配的页帧随之归还
                    fresh.push(memory.alloc().ok_or(VmError::OutOfMemory)?);
                }
                for (index, frame) in (old..pages).zip(fresh) {
                    object.pages.insert(index, frame);
                }
            } else {
                let dropped = object.pages.split_off(&pages);
                if object.mappers > 0 {
                    object.retired.extend(dropped.into_values());
                }
            }
            object.size = pages * PAGE_SIZE;
            debug!("[shm] truncate {} to {:#x}", object.name, object.size);
            Ok(())
        })?
    }

    pub fn size(&self) -> VmResult<usize> {
        self.registry.with_object(self.id, |object| object.size)
    }

    /// number of address spaces holding a live mapping of this object
    pub fn stat(&self) -> VmResult<usize> {
        self.registry.with_object(self.id, |object| object.mappers)
    }

    /// Frame of page `index`, `None` past the current size.
    pub fn frame(&self, index: usize) -> VmResult<Option<PhysPageNum>> {
        self.registry
            .with_object(self.id, |object| object.pages.get(&index).map(|f| f.ppn))
    }

    /// Count one more address space mapping this object.
    pub fn map_reference(&self) -> VmResult<()> {
        self.registry.with_object(self.id, |object| {
            object.mappers += 1;
            trace!("[shm] {} mappers -> {}", object.name, object.mappers);
        })
    }

    /// Undo one `map_reference`.
    pub fn release_reference(&self) {
        let mut inner = self.registry.inner.lock();
        let reclaim = match inner.objects.get_mut(&self.id) {
            Some(object) => {
                assert!(object.mappers > 0, "shm #{} released too often", self.id);
                object.mappers -= 1;
                trace!("[shm] {} mappers -> {}", object.name, object.mappers);
                if object.mappers == 0 {
                    object.retired.clear();
                }
                object.reclaimable()
            }
            None => false,
        };
        if reclaim {
            ShmRegistry::reclaim(&mut inner, self.id);
        }
    }
}
