/// Render layer configuration

use crate::error::{Error, Result};
use crate::graphics_device::{EmulatedDeviceConfig, IndexFormat};
use crate::dynamic::DynamicVertex;

/// Backend selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Direct buffer mapping with discard / no-overwrite hints
    DirectMap,
    /// Explicit staging plus upload
    Staged,
}

/// Render layer configuration
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Backend to create
    pub backend: BackendKind,
    /// Default capacity of the device vertex ring (elements)
    pub vertex_ring_capacity: u32,
    /// Default capacity of the device index ring (elements)
    pub index_ring_capacity: u32,
    /// Default capacity of each CPU sorting ring (elements)
    pub sorting_ring_capacity: u32,
    /// Vertex stride of the ring-allocated vertex format (bytes)
    pub dynamic_vertex_stride: u32,
    /// Index format of the ring-allocated indices
    pub dynamic_index_format: IndexFormat,
    /// Native buffer memory available to the emulated device (bytes)
    pub memory_budget: u64,
    /// Frames submitted but not yet executed by the device
    pub frame_latency: usize,
    /// Enable validation and verbose lock tracing
    pub enable_validation: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::DirectMap,
            vertex_ring_capacity: 5000,
            index_ring_capacity: 5000,
            sorting_ring_capacity: 5000,
            dynamic_vertex_stride: DynamicVertex::STRIDE,
            dynamic_index_format: IndexFormat::U16,
            memory_budget: 64 * 1024 * 1024,
            frame_latency: 1,
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl RenderConfig {
    /// Reject configurations the render layer cannot run with
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.vertex_ring_capacity == 0, "vertex_ring_capacity must be non-zero"),
            (self.index_ring_capacity == 0, "index_ring_capacity must be non-zero"),
            (self.sorting_ring_capacity == 0, "sorting_ring_capacity must be non-zero"),
            (self.dynamic_vertex_stride == 0, "dynamic_vertex_stride must be non-zero"),
            (self.memory_budget == 0, "memory_budget must be non-zero"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(Error::InitializationFailed(reason.to_string())),
            None => Ok(()),
        }
    }

    /// Settings for the emulated device
    pub fn device_config(&self) -> EmulatedDeviceConfig {
        EmulatedDeviceConfig {
            memory_budget: self.memory_budget,
            frame_latency: self.frame_latency,
            enable_validation: self.enable_validation,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
