/// Ring Allocator - successive short-lived sub-allocations out of one
/// resizable dynamic resource
///
/// Each acquisition returns a `LockScope` over the next `count` elements:
///
/// 1. a scope still outstanding fails with `ConcurrentLock`
/// 2. no backing resource yet, or `count > capacity`: the backing resource is
///    replaced by one of `max(count, default_capacity)` elements and the range
///    starts at zero with `Discard`
/// 3. `write_offset + count > capacity`: wrap to zero with `Discard`
/// 4. otherwise start at `write_offset`, `Discard` when that is zero and
///    `Append` past it
///
/// Releasing the scope moves `write_offset` to the end of the range. The
/// offset is never reset per frame: wrapping is lazy, which is what lets the
/// backend keep reading earlier ranges of the same frame (and of frames still
/// in flight) while new ranges are appended.

use std::sync::{Arc, Mutex};

use crate::dynamic::lock_scope::{LockMode, LockScope};
use crate::error::{Error, Result};
use crate::graphics_device::BufferCategory;
use crate::resource::{BufferHandle, BufferPool, BufferResourceDesc, StorageKind};
use crate::{engine_debug, engine_trace};

/// Write position shared between a ring and its outstanding scope
#[derive(Debug, Default)]
pub(crate) struct RingCursor {
    write_offset: u32,
    in_use: bool,
}

impl RingCursor {
    /// Called by the scope on release
    pub(crate) fn finish(&mut self, end: u32) {
        self.write_offset = end;
        self.in_use = false;
    }
}

/// Ring counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub acquisitions: u64,
    pub wraps: u64,
    /// Backing resource replaced by a larger one
    pub resizes: u64,
}

/// Ring allocator over one dynamic resource
pub struct RingAllocator {
    name: &'static str,
    category: BufferCategory,
    storage: StorageKind,
    stride: u32,
    default_capacity: u32,
    handle: Option<BufferHandle>,
    capacity: u32,
    epoch: u64,
    cursor: Arc<Mutex<RingCursor>>,
    stats: RingStats,
}

impl RingAllocator {
    /// Create a ring without backing storage
    ///
    /// # Arguments
    ///
    /// * `name` - Used in log messages
    /// * `category` - Vertex or index elements
    /// * `storage` - Device ring, or CPU (sorting) ring
    /// * `stride` - Element size in bytes
    /// * `default_capacity` - Minimum capacity (elements) of the backing resource
    pub fn new(
        name: &'static str,
        category: BufferCategory,
        storage: StorageKind,
        stride: u32,
        default_capacity: u32,
    ) -> Self {
        Self {
            name,
            category,
            storage,
            stride,
            default_capacity,
            handle: None,
            capacity: 0,
            epoch: 0,
            cursor: Arc::new(Mutex::new(RingCursor::default())),
            stats: RingStats::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn category(&self) -> BufferCategory {
        self.category
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.storage
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Backing resource, once allocated
    pub fn handle(&self) -> Option<BufferHandle> {
        self.handle
    }

    /// Capacity of the backing resource (elements), zero before the first acquisition
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn default_capacity(&self) -> u32 {
        self.default_capacity
    }

    /// Next free element
    pub fn write_offset(&self) -> u32 {
        self.cursor.lock().map(|cursor| cursor.write_offset).unwrap_or(0)
    }

    /// Whether a scope is outstanding
    pub fn is_in_use(&self) -> bool {
        self.cursor.lock().map(|cursor| cursor.in_use).unwrap_or(true)
    }

    /// Frames begun since creation
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn stats(&self) -> RingStats {
        self.stats
    }

    /// Acquire a scope over the next `count` elements
    pub fn acquire(&mut self, pool: &mut BufferPool, count: u32) -> Result<LockScope> {
        if count == 0 {
            return Err(Error::InvalidResource(format!("{}: empty acquisition", self.name)));
        }
        let (write_offset, in_use) = {
            let cursor = self.cursor_guard()?;
            (cursor.write_offset, cursor.in_use)
        };
        if in_use {
            return Err(Error::ConcurrentLock(format!(
                "{}: previous acquisition has not been released", self.name
            )));
        }

        let mut wrapped = false;
        let (handle, start, mode) = match self.handle {
            Some(handle) if count <= self.capacity && pool.contains(handle) => {
                if write_offset as u64 + count as u64 > self.capacity as u64 {
                    wrapped = true;
                    (handle, 0, LockMode::Discard)
                } else if write_offset == 0 {
                    (handle, 0, LockMode::Discard)
                } else {
                    (handle, write_offset, LockMode::Append)
                }
            }
            _ => (self.resize(pool, count)?, 0, LockMode::Discard),
        };

        let scope = pool.lock_ring(handle, start, count, mode, Arc::clone(&self.cursor))?;
        self.cursor_guard()?.in_use = true;
        self.stats.acquisitions += 1;
        if wrapped {
            self.stats.wraps += 1;
            engine_trace!("skirmish::RingAllocator", "{}: wrap at {}", self.name, write_offset);
        }
        Ok(scope)
    }

    /// Replace the backing resource with one that holds at least `count` elements
    fn resize(&mut self, pool: &mut BufferPool, count: u32) -> Result<BufferHandle> {
        let capacity = count.max(self.default_capacity);
        let desc = match self.category {
            BufferCategory::Vertex => BufferResourceDesc::vertex(capacity, self.stride),
            BufferCategory::Index => BufferResourceDesc {
                category: BufferCategory::Index,
                ..BufferResourceDesc::vertex(capacity, self.stride)
            },
        };
        let desc = match self.storage {
            StorageKind::Device => desc.dynamic(),
            StorageKind::Cpu => desc.dynamic().cpu(),
        };

        let handle = pool.create(&desc)?;
        if let Some(old) = self.handle.replace(handle) {
            // Bindings may still hold engine references; the pool destroys it once they drop.
            pool.release(old)?;
            self.stats.resizes += 1;
            engine_debug!(
                "skirmish::RingAllocator",
                "{}: resized from {} to {} elements", self.name, self.capacity, capacity
            );
        }
        self.capacity = capacity;
        self.cursor_guard()?.write_offset = 0;
        Ok(handle)
    }

    /// Start a new frame
    ///
    /// Advances the frame epoch only; the write offset keeps wrapping lazily.
    pub fn begin_frame(&mut self) {
        self.epoch += 1;
    }

    /// Restart at offset zero (after device recovery)
    ///
    /// The backing resource is kept; the next acquisition discards it.
    pub fn reset_cursor(&mut self) -> Result<()> {
        let mut cursor = self.cursor_guard()?;
        cursor.write_offset = 0;
        cursor.in_use = false;
        Ok(())
    }

    /// Drop the ring's owner reference on its backing resource
    pub fn release_storage(&mut self, pool: &mut BufferPool) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            self.capacity = 0;
            pool.release(handle)?;
        }
        Ok(())
    }

    fn cursor_guard(&self) -> Result<std::sync::MutexGuard<'_, RingCursor>> {
        self.cursor
            .lock()
            .map_err(|_| Error::BackendError(format!("{}: ring cursor mutex poisoned", self.name)))
    }
}

#[cfg(test)]
#[path = "ring_allocator_tests.rs"]
mod tests;
