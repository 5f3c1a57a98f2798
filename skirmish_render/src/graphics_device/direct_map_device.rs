/// Legacy-style backend: buffers are written through direct mappings
///
/// A `Discard` map of an allocation that queued draws still read is satisfied
/// with a fresh allocation (renaming), leaving the queued draws untouched.
/// A `NoOverwrite` map writes in place. Overlapping a range that a queued
/// draw still reads is a write hazard: it is counted, and refused with
/// `InvalidLockMode` when validation is enabled.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::graphics_device::emulation::{EmulatedDevice, NativeCall, WritePath};
use crate::graphics_device::{Buffer, BufferWriter, MapHint, MappedWrites, WriteModel};
use crate::{engine_err, engine_trace, engine_warn};

/// Direct-map write path marker
pub struct DirectMap;

/// Emulated device exposing `BufferWriter::Mapped`
pub type DirectMapDevice = EmulatedDevice<DirectMap>;

impl WritePath for DirectMap {
    const NAME: &'static str = "direct-map";
    const MODEL: WriteModel = WriteModel::DirectMap;

    fn writer(device: &mut EmulatedDevice<Self>) -> BufferWriter<'_> {
        BufferWriter::Mapped(device)
    }
}

impl MappedWrites for EmulatedDevice<DirectMap> {
    fn map(&mut self, buffer: &Arc<dyn Buffer>, offset: u64, size: u64, hint: MapHint) -> Result<NonNull<u8>> {
        self.ensure_not_lost()?;
        let native = self.resolve_buffer(buffer)?;
        let id = native.id();
        if self.mapped.contains_key(&id) {
            return Err(engine_err!("skirmish::DirectMapDevice", "Buffer {} is already mapped", id));
        }

        let end = offset
            .checked_add(size)
            .filter(|end| *end <= native.size())
            .ok_or(Error::RangeViolation {
                offset: offset as usize,
                len: size as usize,
                limit: native.size() as usize,
            })?;

        let mut block = native.current_block();
        match hint {
            MapHint::Discard => {
                if self.block_in_flight(&block) {
                    let block_id = self.next_id();
                    block = native.rename(block_id);
                    self.stats_mut().renames += 1;
                    engine_trace!("skirmish::DirectMapDevice", "Buffer {} renamed on discard", id);
                }
            }
            MapHint::NoOverwrite => {
                if self.range_in_flight(&block, &(offset as usize..end as usize)) {
                    self.stats_mut().write_hazards += 1;
                    if self.validation_enabled() {
                        engine_warn!(
                            "skirmish::DirectMapDevice",
                            "No-overwrite map of buffer {} [{}..{}) overlaps a queued draw",
                            id, offset, end
                        );
                        return Err(Error::InvalidLockMode(format!(
                            "No-overwrite map of buffer {} [{}..{}) overlaps bytes a queued draw reads",
                            id, offset, end
                        )));
                    }
                }
            }
        }

        let ptr = block
            .ptr_at(offset as usize)
            .and_then(NonNull::new)
            .ok_or_else(|| Error::BackendError(format!("Buffer {} has no storage at {}", id, offset)))?;

        self.mapped.insert(id, block);
        let stats = self.stats_mut();
        stats.maps += 1;
        stats.bytes_written += size;
        self.record_call(NativeCall::Map { buffer: id, offset, size, hint });
        Ok(ptr)
    }

    fn unmap(&mut self, buffer: &Arc<dyn Buffer>) -> Result<()> {
        self.ensure_not_lost()?;
        let id = self.resolve_buffer(buffer)?.id();
        if self.mapped.remove(&id).is_none() {
            return Err(engine_err!("skirmish::DirectMapDevice", "Buffer {} is not mapped", id));
        }
        self.record_call(NativeCall::Unmap { buffer: id });
        Ok(())
    }
}

#[cfg(test)]
#[path = "direct_map_device_tests.rs"]
mod tests;
