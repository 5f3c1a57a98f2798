/// Modern-style backend: buffers are written through explicit staging uploads
///
/// Each upload copies the caller's staging array into a copy command that is
/// ordered with the draws around it, so a draw always sees exactly the bytes
/// uploaded before it was recorded.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::graphics_device::emulation::{EmulatedDevice, NativeCall, WritePath};
use crate::graphics_device::{Buffer, BufferWriter, MapHint, StagedWrites, WriteModel};

/// Staged write path marker
pub struct Staged;

/// Emulated device exposing `BufferWriter::Staged`
pub type StagedDevice = EmulatedDevice<Staged>;

impl WritePath for Staged {
    const NAME: &'static str = "staged";
    const MODEL: WriteModel = WriteModel::Staged;

    fn writer(device: &mut EmulatedDevice<Self>) -> BufferWriter<'_> {
        BufferWriter::Staged(device)
    }
}

impl StagedWrites for EmulatedDevice<Staged> {
    fn upload(&mut self, buffer: &Arc<dyn Buffer>, offset: u64, data: &[u8], _hint: MapHint) -> Result<()> {
        self.ensure_not_lost()?;
        let native = self.resolve_buffer(buffer)?;
        let size = data.len() as u64;
        if offset.checked_add(size).map_or(true, |end| end > native.size()) {
            return Err(Error::RangeViolation {
                offset: offset as usize,
                len: data.len(),
                limit: native.size() as usize,
            });
        }

        let id = native.id();
        let block = native.current_block();
        self.queue_copy(block, offset as usize, data.to_vec());
        let stats = self.stats_mut();
        stats.uploads += 1;
        stats.bytes_written += size;
        self.record_call(NativeCall::Upload { buffer: id, offset, size });
        Ok(())
    }
}

#[cfg(test)]
#[path = "staged_device_tests.rs"]
mod tests;
