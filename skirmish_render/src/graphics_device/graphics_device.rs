/// GraphicsDevice trait - the native graphics API seen by the render layer
///
/// Everything above this trait (buffer pool, ring allocators, state cache,
/// draw dispatcher) is backend independent. Backends are selected through
/// `BackendKind` and shared as `Arc<Mutex<dyn GraphicsDevice>>`.

use std::sync::{Arc, Mutex, MutexGuard};
use glam::Mat4;

use crate::error::{Error, Result};
use crate::graphics_device::{
    Buffer, BufferDesc, BufferWriter, IndexFormat, Light, MaterialDesc, PrimitiveKind,
    ShaderDesc, Texture, TextureDesc, TransformSlot, WriteModel,
};

// ============================================================================
// Common types
// ============================================================================

/// Outcome of presenting a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Frame submitted and presented
    Presented,
    /// The device was lost; every native resource must be recreated
    DeviceLost,
}

/// Device statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphicsDeviceStats {
    /// Native calls issued since creation (or last reset)
    pub native_calls: u64,
    /// Native buffers created
    pub buffers_created: u64,
    /// Direct maps performed
    pub maps: u64,
    /// Discard maps satisfied with a fresh allocation because the old one was in flight
    pub renames: u64,
    /// Explicit staging uploads performed
    pub uploads: u64,
    /// Bytes copied into native buffers
    pub bytes_written: u64,
    /// Writes that overlapped data still read by queued draws
    pub write_hazards: u64,
    /// Draws executed by the device
    pub draws_executed: u64,
    /// Native buffer memory currently allocated (bytes)
    pub memory_used: u64,
}

// ============================================================================
// GraphicsDevice trait
// ============================================================================

/// Native graphics device
///
/// Models a fixed-function API: transforms, lights, material, shader settings,
/// texture stages, vertex streams and an index buffer are bound individually,
/// then drawn with the currently bound state.
pub trait GraphicsDevice: Send {
    /// Backend name (for logs)
    fn name(&self) -> &'static str;

    /// Kind of buffer write path this device exposes
    fn write_model(&self) -> WriteModel;

    /// Buffer write capability
    fn buffer_writer(&mut self) -> BufferWriter<'_>;

    /// Create a buffer
    ///
    /// # Arguments
    ///
    /// * `desc` - Buffer descriptor
    ///
    /// # Returns
    ///
    /// A shared pointer to the created buffer, or `Error::OutOfMemory` when
    /// the device memory budget is exhausted
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>>;

    /// Create a texture from decoded pixels
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<Arc<dyn Texture>>;

    /// Set a transform matrix
    fn set_transform(&mut self, slot: TransformSlot, matrix: &Mat4) -> Result<()>;

    /// Set or clear a light slot
    fn set_light(&mut self, index: usize, light: Option<&Light>) -> Result<()>;

    /// Set or clear the material
    fn set_material(&mut self, material: Option<&MaterialDesc>) -> Result<()>;

    /// Set the fixed-function shader settings
    fn set_shader(&mut self, shader: &ShaderDesc) -> Result<()>;

    /// Set or clear a texture stage
    fn set_texture(&mut self, stage: usize, texture: Option<&Arc<dyn Texture>>) -> Result<()>;

    /// Bind or unbind a vertex stream
    ///
    /// # Arguments
    ///
    /// * `stream` - Stream index
    /// * `buffer` - Vertex buffer, `None` to unbind
    /// * `stride` - Vertex size in bytes
    fn set_vertex_buffer(&mut self, stream: usize, buffer: Option<&Arc<dyn Buffer>>, stride: u32) -> Result<()>;

    /// Bind or unbind the index buffer
    fn set_index_buffer(&mut self, buffer: Option<&Arc<dyn Buffer>>, format: IndexFormat) -> Result<()>;

    /// Draw non-indexed primitives from stream 0
    ///
    /// # Arguments
    ///
    /// * `primitive` - Topology
    /// * `start_vertex` - First vertex in the bound buffer
    /// * `primitive_count` - Number of primitives
    fn draw(&mut self, primitive: PrimitiveKind, start_vertex: u32, primitive_count: u32) -> Result<()>;

    /// Draw indexed primitives
    ///
    /// # Arguments
    ///
    /// * `primitive` - Topology
    /// * `base_vertex` - Added to every index before fetching a vertex
    /// * `min_vertex` - Lowest index referenced (relative to `base_vertex`)
    /// * `vertex_count` - Number of vertices referenced, `0` when unknown
    /// * `start_index` - First index in the bound index buffer
    /// * `primitive_count` - Number of primitives
    fn draw_indexed(
        &mut self,
        primitive: PrimitiveKind,
        base_vertex: i32,
        min_vertex: u32,
        vertex_count: u32,
        start_index: u32,
        primitive_count: u32,
    ) -> Result<()>;

    /// Begin recording a frame
    fn begin_frame(&mut self) -> Result<()>;

    /// Submit the frame and present it
    fn end_frame(&mut self) -> Result<FrameStatus>;

    /// Wait for all submitted work to complete
    fn wait_idle(&mut self) -> Result<()>;

    /// Recreate the device after a loss
    ///
    /// Every buffer and texture created before the call becomes invalid.
    fn reset(&mut self) -> Result<()>;

    /// Whether the device is currently lost
    fn is_lost(&self) -> bool;

    /// Get statistics about the device
    fn stats(&self) -> GraphicsDeviceStats;
}

/// Lock a shared device, mapping a poisoned mutex to a backend error
pub fn lock_device(device: &Arc<Mutex<dyn GraphicsDevice>>) -> Result<MutexGuard<'_, dyn GraphicsDevice + 'static>> {
    device
        .lock()
        .map_err(|_| Error::BackendError("Graphics device mutex poisoned".to_string()))
}
