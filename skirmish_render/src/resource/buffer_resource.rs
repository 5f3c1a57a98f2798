/// Buffer Resource - a vertex or index buffer managed by the `BufferPool`
///
/// A resource has a category, a storage kind (native device buffer or CPU
/// array), an element layout, a capacity in elements and two reference
/// counts: owner references held by game code, and engine references held by
/// pipeline bindings. It is destroyed when both counts reach zero.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::graphics_device::{Buffer, BufferCategory, IndexFormat};

/// How the resource is rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Written rarely, never while bound
    Static,
    /// Rewritten every frame through the discard / append protocol
    Dynamic,
}

/// Where the resource bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Native device buffer
    Device,
    /// CPU array (sorting geometry), copied to the device at draw time
    Cpu,
}

/// Descriptor for creating a buffer resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferResourceDesc {
    pub category: BufferCategory,
    /// Capacity in elements
    pub capacity: u32,
    /// Element size in bytes
    pub stride: u32,
    pub usage: BufferUsage,
    pub storage: StorageKind,
}

impl BufferResourceDesc {
    /// Static device vertex buffer
    pub fn vertex(capacity: u32, stride: u32) -> Self {
        Self {
            category: BufferCategory::Vertex,
            capacity,
            stride,
            usage: BufferUsage::Static,
            storage: StorageKind::Device,
        }
    }

    /// Static device index buffer
    pub fn index(capacity: u32, format: IndexFormat) -> Self {
        Self {
            category: BufferCategory::Index,
            capacity,
            stride: format.size_bytes(),
            usage: BufferUsage::Static,
            storage: StorageKind::Device,
        }
    }

    /// Same descriptor with dynamic usage
    pub fn dynamic(mut self) -> Self {
        self.usage = BufferUsage::Dynamic;
        self
    }

    /// Same descriptor backed by CPU storage
    pub fn cpu(mut self) -> Self {
        self.storage = StorageKind::Cpu;
        self
    }

    /// Size of the backing storage in bytes
    pub fn byte_size(&self) -> u64 {
        self.capacity as u64 * self.stride as u64
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.capacity == 0 || self.stride == 0 {
            return Err(Error::InvalidResource(format!(
                "Buffer capacity and stride must be non-zero (capacity {}, stride {})",
                self.capacity, self.stride
            )));
        }
        if self.category == BufferCategory::Index && self.stride != 2 && self.stride != 4 {
            return Err(Error::InvalidResource(format!(
                "Index buffers use 2 or 4 byte indices, got stride {}",
                self.stride
            )));
        }
        Ok(())
    }
}

/// Backing storage of a resource
#[derive(Clone)]
pub(crate) enum BufferStorage {
    Device(Arc<dyn Buffer>),
    /// Device storage dropped by a device loss, awaiting restore
    Lost,
    Cpu(Arc<Mutex<Vec<u8>>>),
}

/// Buffer resource
pub struct BufferResource {
    pub(crate) desc: BufferResourceDesc,
    pub(crate) storage: BufferStorage,
    pub(crate) owner_refs: u32,
    pub(crate) engine_refs: u32,
    pub(crate) lock_flag: Arc<AtomicBool>,
    /// Committed bytes of a static device resource
    pub(crate) shadow: Option<Arc<Mutex<Vec<u8>>>>,
}

impl BufferResource {
    pub(crate) fn new(desc: BufferResourceDesc, storage: BufferStorage) -> Self {
        let shadow = match (desc.usage, desc.storage) {
            (BufferUsage::Static, StorageKind::Device) => {
                Some(Arc::new(Mutex::new(vec![0u8; desc.byte_size() as usize])))
            }
            _ => None,
        };
        Self {
            desc,
            storage,
            owner_refs: 1,
            engine_refs: 0,
            lock_flag: Arc::new(AtomicBool::new(false)),
            shadow,
        }
    }

    pub fn desc(&self) -> &BufferResourceDesc {
        &self.desc
    }

    pub fn category(&self) -> BufferCategory {
        self.desc.category
    }

    pub fn usage(&self) -> BufferUsage {
        self.desc.usage
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.desc.storage
    }

    /// Element stride in bytes
    pub fn stride(&self) -> u32 {
        self.desc.stride
    }

    /// Capacity in elements
    pub fn capacity(&self) -> u32 {
        self.desc.capacity
    }

    pub fn byte_size(&self) -> u64 {
        self.desc.byte_size()
    }

    pub fn owner_refs(&self) -> u32 {
        self.owner_refs
    }

    /// References held by pipeline bindings
    pub fn engine_refs(&self) -> u32 {
        self.engine_refs
    }

    /// Whether a lock scope is outstanding
    pub fn is_locked(&self) -> bool {
        self.lock_flag.load(Ordering::Acquire)
    }

    /// Whether the device storage was dropped by a device loss
    pub fn is_lost(&self) -> bool {
        matches!(self.storage, BufferStorage::Lost)
    }

    /// Index format of an index resource
    pub fn index_format(&self) -> Option<IndexFormat> {
        match (self.desc.category, self.desc.stride) {
            (BufferCategory::Index, 2) => Some(IndexFormat::U16),
            (BufferCategory::Index, 4) => Some(IndexFormat::U32),
            _ => None,
        }
    }

    /// Native buffer of a device resource
    pub fn device_buffer(&self) -> Option<&Arc<dyn Buffer>> {
        match &self.storage {
            BufferStorage::Device(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Copy `len` bytes at `offset` out of a CPU resource
    pub fn read_cpu(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let BufferStorage::Cpu(bytes) = &self.storage else {
            return Err(Error::InvalidResource("Resource does not have CPU storage".to_string()));
        };
        let bytes = bytes
            .lock()
            .map_err(|_| Error::BackendError("CPU storage mutex poisoned".to_string()))?;
        bytes
            .get(offset..offset.saturating_add(len))
            .map(|slice| slice.to_vec())
            .ok_or(Error::RangeViolation { offset, len, limit: bytes.len() })
    }
}

#[cfg(test)]
#[path = "buffer_resource_tests.rs"]
mod tests;
