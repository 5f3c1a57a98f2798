/// Buffer Pool - registry of buffer resources keyed by stable handles
///
/// Uses a SlotMap for O(1) insert/remove with stable keys. The pool owns the
/// reference counting rules of every resource, hands out lock scopes, keeps a
/// recycle list of released native buffers and rebuilds device storage after
/// a device loss.

use std::sync::{Arc, Mutex};
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};

use crate::dynamic::lock_scope::{LockMode, LockScope, ScopeRequest, ScopeStorage};
use crate::dynamic::ring_allocator::RingCursor;
use crate::error::{Error, Result};
use crate::graphics_device::{lock_device, Buffer, BufferCategory, BufferDesc, GraphicsDevice, MapHint};
use crate::resource::buffer_resource::{
    BufferResource, BufferResourceDesc, BufferStorage, BufferUsage, StorageKind,
};
use crate::{engine_debug, engine_error, engine_warn};

// ===== SLOT MAP KEY =====

new_key_type! {
    /// Stable handle of a buffer resource.
    ///
    /// A handle becomes invalid only when its own resource is destroyed.
    pub struct BufferHandle;
}

/// Pool-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live resources
    pub buffer_count: u32,
    /// Elements across all live resources
    pub total_elements: u64,
    /// Bytes across all live resources
    pub total_bytes: u64,
    /// Creations satisfied from the recycle list
    pub recycled_reuses: u64,
    /// Native buffers dropped from the recycle list under memory pressure
    pub evictions: u64,
}

type RecycleKey = (BufferCategory, u64, BufferUsage);

/// Registry of buffer resources
pub struct BufferPool {
    /// Graphics device used to allocate and write native buffers
    graphics_device: Arc<Mutex<dyn GraphicsDevice>>,
    resources: SlotMap<BufferHandle, BufferResource>,
    /// Released native buffers available for reuse, by category, byte size and usage
    recycled: FxHashMap<RecycleKey, Vec<Arc<dyn Buffer>>>,
    stats: PoolStats,
}

impl BufferPool {
    /// Create an empty pool allocating from `graphics_device`
    pub fn new(graphics_device: Arc<Mutex<dyn GraphicsDevice>>) -> Self {
        Self {
            graphics_device,
            resources: SlotMap::with_key(),
            recycled: FxHashMap::default(),
            stats: PoolStats::default(),
        }
    }

    // ===== CREATION & LOOKUP =====

    /// Create a resource with one owner reference
    ///
    /// # Arguments
    ///
    /// * `desc` - Category, capacity, stride, usage and storage kind
    ///
    /// # Returns
    ///
    /// The handle of the new resource. Fails with `InvalidResource` for a zero
    /// capacity or stride and with `OutOfMemory` when the device cannot
    /// allocate even after evicting recycled storage.
    pub fn create(&mut self, desc: &BufferResourceDesc) -> Result<BufferHandle> {
        desc.validate()?;
        let storage = match desc.storage {
            StorageKind::Device => BufferStorage::Device(self.allocate(desc)?),
            StorageKind::Cpu => {
                BufferStorage::Cpu(Arc::new(Mutex::new(vec![0u8; desc.byte_size() as usize])))
            }
        };

        let handle = self.resources.insert(BufferResource::new(*desc, storage));
        self.stats.buffer_count += 1;
        self.stats.total_elements += desc.capacity as u64;
        self.stats.total_bytes += desc.byte_size();
        engine_debug!(
            "skirmish::BufferPool",
            "Created {:?} {:?} {:?} buffer {:?} ({} x {} bytes)",
            desc.usage, desc.storage, desc.category, handle, desc.capacity, desc.stride
        );
        Ok(handle)
    }

    /// Get a resource
    pub fn get(&self, handle: BufferHandle) -> Option<&BufferResource> {
        self.resources.get(handle)
    }

    pub fn contains(&self, handle: BufferHandle) -> bool {
        self.resources.contains_key(handle)
    }

    /// Number of live resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Number of native buffers waiting in the recycle list
    pub fn recycled_count(&self) -> usize {
        self.recycled.values().map(Vec::len).sum()
    }

    fn resource(&self, handle: BufferHandle) -> Result<&BufferResource> {
        self.resources
            .get(handle)
            .ok_or_else(|| Error::InvalidResource(format!("Unknown buffer handle {:?}", handle)))
    }

    fn resource_mut(&mut self, handle: BufferHandle) -> Result<&mut BufferResource> {
        self.resources
            .get_mut(handle)
            .ok_or_else(|| Error::InvalidResource(format!("Unknown buffer handle {:?}", handle)))
    }

    /// Native buffer backing a device resource
    pub fn device_buffer(&self, handle: BufferHandle) -> Result<Arc<dyn Buffer>> {
        let resource = self.resource(handle)?;
        match &resource.storage {
            BufferStorage::Device(buffer) => Ok(Arc::clone(buffer)),
            BufferStorage::Lost => Err(Error::DeviceLost),
            BufferStorage::Cpu(_) => Err(Error::InvalidResource(format!(
                "Buffer {:?} has CPU storage", handle
            ))),
        }
    }

    // ===== REFERENCE COUNTING =====

    /// Take an owner reference, returning the new owner count
    pub fn add_ref(&mut self, handle: BufferHandle) -> Result<u32> {
        let resource = self.resource_mut(handle)?;
        resource.owner_refs += 1;
        Ok(resource.owner_refs)
    }

    /// Drop an owner reference, returning the remaining owner count
    ///
    /// The resource is destroyed once both counts are zero.
    pub fn release(&mut self, handle: BufferHandle) -> Result<u32> {
        let resource = self.resource_mut(handle)?;
        if resource.owner_refs == 0 {
            return Err(Error::InvalidResource(format!(
                "Owner reference of {:?} released below zero", handle
            )));
        }
        resource.owner_refs -= 1;
        let remaining = resource.owner_refs;
        self.destroy_if_unreferenced(handle);
        Ok(remaining)
    }

    /// Take an engine (pipeline binding) reference, returning the new engine count
    pub fn add_engine_ref(&mut self, handle: BufferHandle) -> Result<u32> {
        let resource = self.resource_mut(handle)?;
        resource.engine_refs += 1;
        Ok(resource.engine_refs)
    }

    /// Drop an engine reference, returning the remaining engine count
    pub fn release_engine_ref(&mut self, handle: BufferHandle) -> Result<u32> {
        let resource = self.resource_mut(handle)?;
        if resource.engine_refs == 0 {
            return Err(Error::InvalidResource(format!(
                "Engine reference of {:?} released below zero", handle
            )));
        }
        resource.engine_refs -= 1;
        let remaining = resource.engine_refs;
        self.destroy_if_unreferenced(handle);
        Ok(remaining)
    }

    fn destroy_if_unreferenced(&mut self, handle: BufferHandle) {
        let unreferenced = self
            .resources
            .get(handle)
            .is_some_and(|r| r.owner_refs == 0 && r.engine_refs == 0);
        if !unreferenced {
            return;
        }
        let Some(resource) = self.resources.remove(handle) else {
            return;
        };
        let desc = resource.desc;
        self.stats.buffer_count -= 1;
        self.stats.total_elements -= desc.capacity as u64;
        self.stats.total_bytes -= desc.byte_size();

        // An outstanding scope still writes the native buffer; it is freed when the scope ends
        if resource.is_locked() {
            engine_debug!("skirmish::BufferPool", "Destroyed buffer {:?} with a lock outstanding", handle);
            return;
        }
        if let BufferStorage::Device(buffer) = resource.storage {
            self.recycled
                .entry((desc.category, desc.byte_size(), desc.usage))
                .or_default()
                .push(buffer);
        }
        engine_debug!("skirmish::BufferPool", "Destroyed buffer {:?}", handle);
    }

    // ===== LOCKING =====

    /// Open a write lock on `[start, start + count)` of a resource
    ///
    /// # Arguments
    ///
    /// * `handle` - Resource to write
    /// * `start` - First element
    /// * `count` - Number of elements
    /// * `mode` - `Discard` (only at element zero) or `Append`
    ///
    /// Static resources bound into the pipeline cannot be locked
    /// (`ResourceInUse`). Dynamic resources are exempt: the discard / append
    /// protocol is what makes writing them while bound safe.
    pub fn lock(&mut self, handle: BufferHandle, start: u32, count: u32, mode: LockMode) -> Result<LockScope> {
        self.open_scope(handle, start, count, mode, None)
    }

    pub(crate) fn lock_ring(
        &mut self,
        handle: BufferHandle,
        start: u32,
        count: u32,
        mode: LockMode,
        cursor: Arc<Mutex<RingCursor>>,
    ) -> Result<LockScope> {
        self.open_scope(handle, start, count, mode, Some(cursor))
    }

    fn open_scope(
        &mut self,
        handle: BufferHandle,
        start: u32,
        count: u32,
        mode: LockMode,
        ring: Option<Arc<Mutex<RingCursor>>>,
    ) -> Result<LockScope> {
        let resource = self.resource(handle)?;
        if count == 0 {
            return Err(Error::InvalidResource(format!("Empty lock requested on {:?}", handle)));
        }
        if start as u64 + count as u64 > resource.capacity() as u64 {
            let stride = resource.stride() as usize;
            return Err(Error::RangeViolation {
                offset: start as usize * stride,
                len: count as usize * stride,
                limit: resource.byte_size() as usize,
            });
        }
        if mode == LockMode::Discard && start != 0 {
            return Err(Error::InvalidLockMode(format!(
                "Discard lock of {:?} must start at element zero, not {}", handle, start
            )));
        }
        if resource.usage() == BufferUsage::Static && resource.engine_refs > 0 {
            return Err(Error::ResourceInUse(format!(
                "Buffer {:?} is bound into the pipeline ({} engine references)",
                handle, resource.engine_refs
            )));
        }

        let storage = match &resource.storage {
            BufferStorage::Device(buffer) => ScopeStorage::Device(Arc::clone(buffer)),
            BufferStorage::Cpu(bytes) => ScopeStorage::Cpu(Arc::clone(bytes)),
            BufferStorage::Lost => return Err(Error::DeviceLost),
        };

        LockScope::open(
            &self.graphics_device,
            ScopeRequest {
                handle,
                storage,
                start,
                count,
                stride: resource.stride(),
                mode,
                lock_flag: Arc::clone(&resource.lock_flag),
                shadow: resource.shadow.clone(),
                ring,
            },
        )
    }

    // ===== ALLOCATION =====

    fn allocate(&mut self, desc: &BufferResourceDesc) -> Result<Arc<dyn Buffer>> {
        let key = (desc.category, desc.byte_size(), desc.usage);
        if let Some(buffer) = self.recycled.get_mut(&key).and_then(Vec::pop) {
            self.stats.recycled_reuses += 1;
            return Ok(buffer);
        }

        let native_desc = BufferDesc {
            size: desc.byte_size(),
            category: desc.category,
            dynamic: desc.usage == BufferUsage::Dynamic,
        };
        let first_attempt = lock_device(&self.graphics_device)?.create_buffer(&native_desc);
        match first_attempt {
            Err(Error::OutOfMemory) => {
                let evicted = self.evict_recycled(desc.category);
                engine_warn!(
                    "skirmish::BufferPool",
                    "Out of memory allocating {} bytes, evicted {} recycled buffers, retrying",
                    native_desc.size, evicted
                );
                let retry = lock_device(&self.graphics_device)?.create_buffer(&native_desc);
                if let Err(err) = &retry {
                    engine_error!(
                        "skirmish::BufferPool",
                        "Allocation of {} bytes failed after eviction: {}", native_desc.size, err
                    );
                }
                retry
            }
            other => other,
        }
    }

    /// Drop recycled native buffers of `category`, returning how many were dropped
    pub fn evict_recycled(&mut self, category: BufferCategory) -> usize {
        let mut evicted = 0;
        self.recycled.retain(|(recycled_category, _, _), buffers| {
            if *recycled_category == category {
                evicted += buffers.len();
                false
            } else {
                true
            }
        });
        self.stats.evictions += evicted as u64;
        evicted
    }

    // ===== DEVICE LOSS =====

    /// Drop every native buffer after a device loss
    ///
    /// Resources keep their handles, counts and shadow copies.
    pub fn on_device_lost(&mut self) {
        self.recycled.clear();
        for resource in self.resources.values_mut() {
            if matches!(resource.storage, BufferStorage::Device(_)) {
                resource.storage = BufferStorage::Lost;
            }
        }
    }

    /// Recreate the native buffer of every lost resource
    ///
    /// Static resources are refilled from their shadow copy; dynamic resources
    /// come back empty.
    pub fn restore(&mut self) -> Result<usize> {
        let lost: Vec<BufferHandle> = self
            .resources
            .iter()
            .filter(|(_, resource)| resource.is_lost())
            .map(|(handle, _)| handle)
            .collect();

        for &handle in &lost {
            let desc = self.resource(handle)?.desc;
            let buffer = self.allocate(&desc)?;
            let resource = self.resource_mut(handle)?;
            resource.storage = BufferStorage::Device(Arc::clone(&buffer));

            if let Some(shadow) = resource.shadow.clone() {
                let bytes = shadow
                    .lock()
                    .map_err(|_| Error::BackendError("Shadow copy mutex poisoned".to_string()))?;
                let mut device = lock_device(&self.graphics_device)?;
                device.buffer_writer().write(&buffer, 0, &bytes, MapHint::Discard)?;
            }
        }

        engine_debug!("skirmish::BufferPool", "Restored {} buffers after device loss", lost.len());
        Ok(lost.len())
    }
}

#[cfg(test)]
#[path = "buffer_pool_tests.rs"]
mod tests;
