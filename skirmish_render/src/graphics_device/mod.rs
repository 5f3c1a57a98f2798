/// Graphics device module - native API abstraction and emulated backends

pub mod graphics_device;
pub mod buffer;
pub mod state;
pub mod emulation;
pub mod direct_map_device;
pub mod staged_device;

pub(crate) mod memory;

pub use graphics_device::*;
pub use buffer::*;
pub use state::*;
pub use emulation::{DrawRecord, DrawState, EmulatedDevice, EmulatedDeviceConfig, NativeCall, WritePath};
pub use direct_map_device::{DirectMap, DirectMapDevice};
pub use staged_device::{Staged, StagedDevice};
