/// Emulated device memory
///
/// `MemoryBlock` stands in for a native allocation the GPU reads from while
/// the CPU may still hold a mapped pointer into it. `MemoryBudget` tracks
/// allocated bytes against a fixed limit so allocation failure is observable.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// One native allocation
///
/// Bytes live in `UnsafeCell`s because mapped pointers write through a shared
/// reference. No `&mut [u8]` into a block is ever handed out: mapped bytes are
/// copied in and out through raw pointers.
pub(crate) struct MemoryBlock {
    id: u64,
    bytes: Box<[UnsafeCell<u8>]>,
}

// SAFETY: every access holds the owning device's mutex. Lock scopes copy
// through mapped pointers only while holding it, and queued copies and draws
// touch blocks while the device executes them behind the same mutex.
unsafe impl Sync for MemoryBlock {}
unsafe impl Send for MemoryBlock {}

impl MemoryBlock {
    pub(crate) fn new(id: u64, size: usize) -> Self {
        Self {
            id,
            bytes: (0..size).map(|_| UnsafeCell::new(0u8)).collect(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Pointer to byte `offset`
    pub(crate) fn ptr_at(&self, offset: usize) -> Option<*mut u8> {
        if offset > self.bytes.len() {
            return None;
        }
        // UnsafeCell<u8> has the same layout as u8.
        Some(unsafe { (self.bytes.as_ptr() as *mut u8).add(offset) })
    }

    /// Copy `len` bytes starting at `offset`
    pub(crate) fn read(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        let end = offset.checked_add(len)?;
        let cells = self.bytes.get(offset..end)?;
        Some(cells.iter().map(|cell| unsafe { *cell.get() }).collect())
    }

    /// Overwrite bytes starting at `offset`
    pub(crate) fn write(&self, offset: usize, data: &[u8]) -> bool {
        let Some(end) = offset.checked_add(data.len()) else {
            return false;
        };
        let Some(cells) = self.bytes.get(offset..end) else {
            return false;
        };
        for (cell, byte) in cells.iter().zip(data) {
            unsafe { *cell.get() = *byte };
        }
        true
    }
}

/// Shared memory budget
#[derive(Clone)]
pub(crate) struct MemoryBudget {
    limit: u64,
    used: Arc<AtomicU64>,
}

impl MemoryBudget {
    pub(crate) fn new(limit: u64) -> Self {
        Self {
            limit,
            used: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub(crate) fn limit(&self) -> u64 {
        self.limit
    }

    /// Reserve `size` bytes, `None` when the budget would be exceeded
    ///
    /// The reservation is returned to the budget when dropped.
    pub(crate) fn reserve(&self, size: u64) -> Option<MemoryReservation> {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let next = current.checked_add(size)?;
            if next > self.limit {
                return None;
            }
            match self.used.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    return Some(MemoryReservation {
                        size,
                        used: Arc::clone(&self.used),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// Bytes held against a `MemoryBudget`
pub(crate) struct MemoryReservation {
    size: u64,
    used: Arc<AtomicU64>,
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.used.fetch_sub(self.size, Ordering::AcqRel);
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
