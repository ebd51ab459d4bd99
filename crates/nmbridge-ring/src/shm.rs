//! The shared ring memory region.
//!
//! Netmap exposes one region per memory allocator; every port registered
//! against it sees its interface descriptor, rings and the buffer pool inside
//! the same mapping. The region is mapped once and shared by every ring handle
//! through an `Arc`, so it outlives all pointers resolved from it.

use std::io;
use std::ptr::NonNull;
use std::sync::Arc;

use memmap2::MmapMut;
use parking_lot::Mutex;

use crate::accessor::InterfaceRef;
use crate::error::LayoutError;

/// A read-write shared mapping of netmap ring memory
pub struct SharedMemory {
    /// Keeps the mapping alive; all access goes through `base`
    _map: MmapMut,
    base: NonNull<u8>,
    len: usize,
}

impl SharedMemory {
    /// Wrap an existing mapping
    pub fn from_mmap(mut map: MmapMut) -> Self {
        let len = map.len();
        // A zero-length mapping still yields a dangling, non-null pointer.
        let base = NonNull::new(map.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Self {
            _map: map,
            base,
            len,
        }
    }

    /// Map an anonymous, zero-filled region of `len` bytes
    pub fn anonymous(len: usize) -> io::Result<Self> {
        Ok(Self::from_mmap(MmapMut::map_anon(len)?))
    }

    /// Base address of the region
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Region size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check that `size` bytes at `offset` lie inside the region
    pub fn contains(&self, offset: i64, size: usize) -> bool {
        offset >= 0
            && (offset as u64)
                .checked_add(size as u64)
                .is_some_and(|end| end <= self.len as u64)
    }

    /// Byte offset of `ptr` from the region base, if it points inside the region
    pub fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        let offset = (ptr as usize).checked_sub(self.base.as_ptr() as usize)?;
        (offset < self.len).then_some(offset)
    }

    pub(crate) fn check(
        &self,
        what: &'static str,
        offset: i64,
        size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, LayoutError> {
        if !self.contains(offset, size) {
            return Err(LayoutError::OutOfBounds {
                what,
                offset,
                size,
                region: self.len,
            });
        }

        let offset = offset as usize;
        // SAFETY: offset + size lies within the mapping (checked above).
        let ptr = unsafe { self.base.add(offset) };
        if !(ptr.as_ptr() as usize).is_multiple_of(align) {
            return Err(LayoutError::Misaligned {
                what,
                offset,
                align,
            });
        }
        Ok(ptr)
    }

    /// Resolve the interface descriptor at `offset` (`NETMAP_IF`)
    pub fn interface(self: &Arc<Self>, offset: u32) -> Result<InterfaceRef, LayoutError> {
        InterfaceRef::resolve(Arc::clone(self), offset)
    }

    /// Copy `bytes` into the region at `offset`
    #[cfg(any(test, feature = "mock"))]
    pub(crate) fn write_at(&self, offset: usize, bytes: &[u8]) {
        assert!(self.contains(offset as i64, bytes.len()));
        // SAFETY: the destination range is inside the mapping (asserted above) and
        // `bytes` cannot alias a region we exclusively own through `_map`.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.as_ptr().add(offset), bytes.len());
        }
    }
}

impl std::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

// SAFETY: `SharedMemory` is Send because:
// - The mapping is created once and never remapped or resized
// - The base pointer is read-only after construction
// - Drop unmaps through `MmapMut` with the original length
unsafe impl Send for SharedMemory {}

// SAFETY: `SharedMemory` is Sync because it exposes no interior mutation of its
// own; ring and buffer memory inside it is written only through ring handles,
// each of which is owned by a single thread.
unsafe impl Sync for SharedMemory {}

/// Lazily established, process-scoped shared mapping
///
/// The first successful mapping is reused by every later ring and port. The
/// lock is held across the whole check-and-map sequence, so two threads
/// configuring ports at the same time cannot both map.
#[derive(Debug, Default)]
pub struct MappingCell {
    region: Mutex<Option<Arc<SharedMemory>>>,
}

impl MappingCell {
    /// Create an empty cell
    pub fn new() -> Self {
        Self::default()
    }

    /// The established mapping, if any
    pub fn get(&self) -> Option<Arc<SharedMemory>> {
        self.region.lock().clone()
    }

    /// Return the established mapping or create it with `map`
    pub fn get_or_try_map<E>(
        &self,
        map: impl FnOnce() -> Result<SharedMemory, E>,
    ) -> Result<Arc<SharedMemory>, E> {
        let mut region = self.region.lock();
        if let Some(existing) = region.as_ref() {
            return Ok(Arc::clone(existing));
        }

        let mapped = Arc::new(map()?);
        tracing::info!(size = mapped.len(), "Mapped netmap shared memory");
        *region = Some(Arc::clone(&mapped));
        Ok(mapped)
    }
}
