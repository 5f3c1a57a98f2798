/// Buffer trait, buffer descriptor and the buffer write capability interface
///
/// Backends differ in how the CPU gets data into a buffer:
/// - legacy backends map the buffer directly and take a discard / no-overwrite hint
/// - modern backends require an explicit staging copy and upload call
///
/// The difference is exposed once, through `BufferWriter`, so lock logic is
/// written a single time against the two variants.

use std::any::Any;
use std::ptr::NonNull;
use std::sync::Arc;
use crate::error::Result;

/// Buffer category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferCategory {
    /// Vertex data
    Vertex,
    /// Index data
    Index,
}

/// Index element format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// 16-bit unsigned indices
    U16,
    /// 32-bit unsigned indices
    U32,
}

impl IndexFormat {
    /// Size of one index in bytes
    pub fn size_bytes(&self) -> u32 {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }

    /// Decode the index stored at element `index` of `bytes`
    pub fn read(&self, bytes: &[u8], index: usize) -> Option<u32> {
        match self {
            IndexFormat::U16 => {
                let start = index * 2;
                let raw = bytes.get(start..start + 2)?;
                Some(u16::from_le_bytes([raw[0], raw[1]]) as u32)
            }
            IndexFormat::U32 => {
                let start = index * 4;
                let raw = bytes.get(start..start + 4)?;
                Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
        }
    }
}

/// Descriptor for creating a native buffer
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Vertex or index data
    pub category: BufferCategory,
    /// Rewritten every frame (ring storage) rather than written once
    pub dynamic: bool,
}

/// Hint attached to a direct buffer mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapHint {
    /// Prior contents may be treated as invalid; the backend may hand out a
    /// fresh allocation instead of waiting for outstanding reads
    Discard,
    /// The caller only writes into previously unused bytes; the backend need
    /// not wait for in-flight reads of the already written prefix
    NoOverwrite,
}

/// Native buffer resource trait
///
/// Implemented by backend-specific buffer types. The buffer is destroyed when
/// the last `Arc` is dropped.
pub trait Buffer: Send + Sync {
    /// Size in bytes
    fn size(&self) -> u64;

    /// Vertex or index data
    fn category(&self) -> BufferCategory;

    /// Backend downcast hook
    fn as_any(&self) -> &dyn Any;
}

/// Direct-mapping write path (legacy backends)
pub trait MappedWrites {
    /// Map `size` bytes at `offset` for CPU writes
    ///
    /// The returned pointer stays valid until `unmap` is called for the same buffer.
    fn map(&mut self, buffer: &Arc<dyn Buffer>, offset: u64, size: u64, hint: MapHint) -> Result<NonNull<u8>>;

    /// Unmap the buffer, making the written range visible to the backend
    fn unmap(&mut self, buffer: &Arc<dyn Buffer>) -> Result<()>;
}

/// Explicit staging write path (modern backends)
pub trait StagedWrites {
    /// Copy `data` from a CPU staging array into the buffer at `offset`
    ///
    /// The copy is ordered with respect to draws recorded before and after it.
    fn upload(&mut self, buffer: &Arc<dyn Buffer>, offset: u64, data: &[u8], hint: MapHint) -> Result<()>;
}

/// Buffer write capability of a device
///
/// Obtained from `GraphicsDevice::buffer_writer`. A device exposes exactly one
/// of the two variants for its whole lifetime.
pub enum BufferWriter<'a> {
    /// Direct mapping with discard / no-overwrite hints
    Mapped(&'a mut dyn MappedWrites),
    /// Explicit staging buffer plus upload call
    Staged(&'a mut dyn StagedWrites),
}

/// Kind of write path a device exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteModel {
    /// See `BufferWriter::Mapped`
    DirectMap,
    /// See `BufferWriter::Staged`
    Staged,
}

impl BufferWriter<'_> {
    /// Kind of this writer
    pub fn model(&self) -> WriteModel {
        match self {
            BufferWriter::Mapped(_) => WriteModel::DirectMap,
            BufferWriter::Staged(_) => WriteModel::Staged,
        }
    }

    /// Write `data` at `offset` through whichever path the device exposes
    pub fn write(&mut self, buffer: &Arc<dyn Buffer>, offset: u64, data: &[u8], hint: MapHint) -> Result<()> {
        match self {
            BufferWriter::Mapped(writes) => {
                let ptr = writes.map(buffer, offset, data.len() as u64, hint)?;
                // SAFETY: the device guarantees `data.len()` writable bytes at `ptr` until unmap.
                unsafe {
                    std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len());
                }
                writes.unmap(buffer)
            }
            BufferWriter::Staged(writes) => writes.upload(buffer, offset, data, hint),
        }
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
