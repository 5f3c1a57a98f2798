/// Lock Scope - scoped write access to a range of a buffer resource
///
/// A scope owns the writable range `[start, start + count)` (in elements) of
/// one resource. Acquisition prepares the range for CPU writes; release makes
/// the whole range visible to the backend at once:
///
/// - direct-map backends: the range is mapped with a discard / no-overwrite
///   hint at acquisition and unmapped at release
/// - staged backends: writes land in a scope-owned staging array, uploaded at release
/// - CPU (sorting) storage: writes land in a staging array, copied at release
///
/// Release is explicit (`release()`, which reports backend errors) or happens
/// on drop (errors are logged). Writes into mapped memory and release both
/// take the device mutex; do not hold it while writing through a scope or
/// dropping one.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::dynamic::ring_allocator::RingCursor;
use crate::error::{Error, Result};
use crate::graphics_device::{lock_device, Buffer, BufferWriter, GraphicsDevice, MapHint};
use crate::resource::BufferHandle;
use crate::{engine_error, engine_trace};

/// Write mode of a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// The previous contents of the whole resource may be dropped;
    /// only valid at offset zero
    Discard,
    /// Only bytes past everything written since the last discard are touched
    Append,
}

impl LockMode {
    pub(crate) fn hint(&self) -> MapHint {
        match self {
            LockMode::Discard => MapHint::Discard,
            LockMode::Append => MapHint::NoOverwrite,
        }
    }
}

/// Range committed by a released scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockedRange {
    /// Resource written
    pub handle: BufferHandle,
    /// First element written
    pub start: u32,
    /// Number of elements in the range
    pub count: u32,
    /// Mode the range was locked with
    pub mode: LockMode,
}

/// Backing storage handed to a scope by the pool
pub(crate) enum ScopeStorage {
    Device(Arc<dyn Buffer>),
    Cpu(Arc<Mutex<Vec<u8>>>),
}

/// Everything needed to open a scope
pub(crate) struct ScopeRequest {
    pub handle: BufferHandle,
    pub storage: ScopeStorage,
    pub start: u32,
    pub count: u32,
    pub stride: u32,
    pub mode: LockMode,
    pub lock_flag: Arc<AtomicBool>,
    pub shadow: Option<Arc<Mutex<Vec<u8>>>>,
    pub ring: Option<Arc<Mutex<RingCursor>>>,
}

enum ScopeTarget {
    Mapped { buffer: Arc<dyn Buffer>, ptr: NonNull<u8> },
    Staged { buffer: Arc<dyn Buffer>, staging: Vec<u8> },
    Cpu { storage: Arc<Mutex<Vec<u8>>>, staging: Vec<u8> },
}

/// Outstanding write lock on a range of a resource
pub struct LockScope {
    device: Arc<Mutex<dyn GraphicsDevice>>,
    handle: BufferHandle,
    start: u32,
    count: u32,
    stride: u32,
    mode: LockMode,
    target: ScopeTarget,
    lock_flag: Arc<AtomicBool>,
    shadow: Option<Arc<Mutex<Vec<u8>>>>,
    ring: Option<Arc<Mutex<RingCursor>>>,
    released: bool,
}

fn poisoned(what: &str) -> Error {
    Error::BackendError(format!("{} mutex poisoned", what))
}

impl LockScope {
    pub(crate) fn open(device: &Arc<Mutex<dyn GraphicsDevice>>, request: ScopeRequest) -> Result<Self> {
        if request
            .lock_flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::ConcurrentLock(format!(
                "Resource {:?} already has an outstanding lock scope", request.handle
            )));
        }

        match Self::prepare(device, &request) {
            Ok(target) => {
                engine_trace!(
                    "skirmish::LockScope",
                    "Locked {:?} [{}..{}) {:?}",
                    request.handle, request.start, request.start + request.count, request.mode
                );
                Ok(Self {
                    device: Arc::clone(device),
                    handle: request.handle,
                    start: request.start,
                    count: request.count,
                    stride: request.stride,
                    mode: request.mode,
                    target,
                    lock_flag: request.lock_flag,
                    shadow: request.shadow,
                    ring: request.ring,
                    released: false,
                })
            }
            Err(err) => {
                request.lock_flag.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    fn prepare(device: &Arc<Mutex<dyn GraphicsDevice>>, request: &ScopeRequest) -> Result<ScopeTarget> {
        let byte_offset = request.start as usize * request.stride as usize;
        let byte_len = request.count as usize * request.stride as usize;

        match &request.storage {
            ScopeStorage::Device(buffer) => {
                // The shadow mutex is never taken while the device mutex is held
                let committed = match &request.shadow {
                    Some(shadow) => Some(shadow.lock().map_err(|_| poisoned("Shadow copy"))?.clone()),
                    None => None,
                };
                let mut device = lock_device(device)?;
                match device.buffer_writer() {
                    BufferWriter::Mapped(writes) => {
                        let ptr = match committed {
                            // A discard may hand back fresh memory, so committed bytes
                            // past a partial range are written back from the shadow.
                            Some(committed) if request.mode == LockMode::Discard && byte_len < committed.len() => {
                                let ptr = writes.map(buffer, 0, committed.len() as u64, MapHint::Discard)?;
                                let tail = &committed[byte_len..];
                                // SAFETY: the device mapped the whole buffer at `ptr`; the
                                // device mutex is held.
                                unsafe {
                                    std::ptr::copy_nonoverlapping(tail.as_ptr(), ptr.as_ptr().add(byte_len), tail.len());
                                }
                                ptr
                            }
                            _ => writes.map(buffer, byte_offset as u64, byte_len as u64, request.mode.hint())?,
                        };
                        Ok(ScopeTarget::Mapped { buffer: Arc::clone(buffer), ptr })
                    }
                    BufferWriter::Staged(_) => {
                        let staging = match committed {
                            Some(committed) => committed[byte_offset..byte_offset + byte_len].to_vec(),
                            None => vec![0u8; byte_len],
                        };
                        Ok(ScopeTarget::Staged { buffer: Arc::clone(buffer), staging })
                    }
                }
            }
            ScopeStorage::Cpu(storage) => {
                let staging = {
                    let bytes = storage.lock().map_err(|_| poisoned("CPU storage"))?;
                    bytes[byte_offset..byte_offset + byte_len].to_vec()
                };
                Ok(ScopeTarget::Cpu { storage: Arc::clone(storage), staging })
            }
        }
    }

    /// Resource being written
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// First element of the range
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Number of elements in the range
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Element stride in bytes
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Size of the range in bytes
    pub fn byte_len(&self) -> usize {
        self.count as usize * self.stride as usize
    }

    /// Range this scope commits on release
    pub fn range(&self) -> LockedRange {
        LockedRange {
            handle: self.handle,
            start: self.start,
            count: self.count,
            mode: self.mode,
        }
    }

    /// Write raw bytes at `offset` (bytes, relative to the range start)
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let limit = self.byte_len();
        let end = offset.checked_add(data.len()).filter(|end| *end <= limit);
        if end.is_none() {
            return Err(Error::RangeViolation { offset, len: data.len(), limit });
        }
        match &mut self.target {
            ScopeTarget::Mapped { ptr, .. } => {
                // Queued draws read mapped memory while the device executes under its mutex
                let _device = lock_device(&self.device)?;
                // SAFETY: the device keeps `limit` bytes at `ptr` mapped until this
                // scope unmaps them, and `offset + data.len() <= limit`.
                unsafe {
                    std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().add(offset), data.len());
                }
            }
            ScopeTarget::Staged { staging, .. } | ScopeTarget::Cpu { staging, .. } => {
                staging[offset..offset + data.len()].copy_from_slice(data);
            }
        }
        Ok(())
    }

    /// Write elements starting at `first_element` (relative to the range start)
    pub fn write<T: bytemuck::Pod>(&mut self, first_element: u32, data: &[T]) -> Result<()> {
        let offset = first_element as usize * self.stride as usize;
        self.write_bytes(offset, bytemuck::cast_slice(data))
    }

    /// Commit the range and end the scope
    pub fn release(mut self) -> Result<LockedRange> {
        let range = self.range();
        self.released = true;
        self.commit()?;
        Ok(range)
    }

    fn commit(&mut self) -> Result<()> {
        let result = self.publish();
        self.lock_flag.store(false, Ordering::Release);
        if let Some(ring) = &self.ring {
            match ring.lock() {
                Ok(mut cursor) => cursor.finish(self.start + self.count),
                Err(_) => return Err(poisoned("Ring cursor")),
            }
        }
        result
    }

    fn update_shadow(&self, bytes: &[u8]) -> Result<()> {
        if let Some(shadow) = &self.shadow {
            let offset = self.start as usize * self.stride as usize;
            let mut shadow = shadow.lock().map_err(|_| poisoned("Shadow copy"))?;
            shadow[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        Ok(())
    }

    fn publish(&mut self) -> Result<()> {
        let byte_offset = self.start as u64 * self.stride as u64;
        let len = self.byte_len();
        let hint = self.mode.hint();

        match &self.target {
            ScopeTarget::Mapped { buffer, ptr } => {
                let (written, unmapped) = {
                    let mut device = lock_device(&self.device)?;
                    let mut written = vec![0u8; len];
                    // SAFETY: still mapped (see `write_bytes`), device mutex held.
                    unsafe {
                        std::ptr::copy_nonoverlapping(ptr.as_ptr(), written.as_mut_ptr(), len);
                    }
                    let unmapped = match device.buffer_writer() {
                        BufferWriter::Mapped(writes) => writes.unmap(buffer),
                        BufferWriter::Staged(_) => Err(Error::BackendError(
                            "Mapped scope released on a staged device".to_string(),
                        )),
                    };
                    (written, unmapped)
                };
                self.update_shadow(&written)?;
                unmapped
            }
            ScopeTarget::Staged { buffer, staging } => {
                self.update_shadow(staging)?;
                let mut device = lock_device(&self.device)?;
                match device.buffer_writer() {
                    BufferWriter::Staged(writes) => writes.upload(buffer, byte_offset, staging, hint),
                    BufferWriter::Mapped(_) => Err(Error::BackendError(
                        "Staged scope released on a direct-map device".to_string(),
                    )),
                }
            }
            ScopeTarget::Cpu { storage, staging } => {
                let mut bytes = storage.lock().map_err(|_| poisoned("CPU storage"))?;
                let offset = byte_offset as usize;
                bytes[offset..offset + staging.len()].copy_from_slice(staging);
                Ok(())
            }
        }
    }
}

impl Drop for LockScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.commit() {
            engine_error!("skirmish::LockScope", "Release of {:?} failed: {}", self.handle, err);
        }
    }
}

#[cfg(test)]
#[path = "lock_scope_tests.rs"]
mod tests;
