/// Render Context - the graphics-thread owner of the render layer
///
/// Ties the buffer pool, the four ring allocators (device and CPU sorting
/// rings, one per category) and the draw dispatcher to one graphics device.
/// Everything higher-level drawing code needs goes through this type:
/// acquiring writable geometry, setting state, drawing, frame boundaries and
/// device recovery.

use std::sync::{Arc, Mutex};
use glam::Mat4;

use crate::config::{BackendKind, RenderConfig};
use crate::dynamic::{LockMode, LockScope, LockedRange, RingAllocator};
use crate::error::{Error, Result};
use crate::graphics_device::{
    lock_device, BufferCategory, DirectMapDevice, FrameStatus, GraphicsDevice,
    GraphicsDeviceStats, IndexFormat, Light, MaterialDesc, PrimitiveKind, ShaderDesc,
    StagedDevice, TextureDesc, TextureRef, TransformSlot,
};
use crate::render_state::render_state_cache::BufferBindings;
use crate::render_state::{
    DrawCall, DrawDispatcher, IndexBinding, RenderState, RenderStateCache, RenderStats,
    VertexBinding,
};
use crate::resource::{
    BufferHandle, BufferPool, BufferResourceDesc, PoolStats, StorageKind, TextureInbox,
    TextureSender,
};
use crate::{engine_debug, engine_error, engine_info, engine_trace, engine_warn};

/// Render layer entry point
pub struct RenderContext {
    config: RenderConfig,
    graphics_device: Arc<Mutex<dyn GraphicsDevice>>,
    pool: BufferPool,
    vertex_ring: RingAllocator,
    index_ring: RingAllocator,
    sorting_vertex_ring: RingAllocator,
    sorting_index_ring: RingAllocator,
    dispatcher: DrawDispatcher,
    texture_inbox: TextureInbox,
    frame_index: u64,
}

/// Acquire from `ring`, folding its counters into the frame statistics
fn acquire_counted(
    ring: &mut RingAllocator,
    pool: &mut BufferPool,
    stats: &mut RenderStats,
    count: u32,
) -> Result<LockScope> {
    let before = ring.stats();
    let scope = ring.acquire(pool, count)?;
    let after = ring.stats();
    stats.locks += 1;
    stats.ring_wraps += (after.wraps - before.wraps) as u32;
    stats.ring_resizes += (after.resizes - before.resizes) as u32;
    Ok(scope)
}

impl RenderContext {
    // ===== CONSTRUCTION =====

    /// Create the context and the emulated device selected by `config.backend`
    pub fn new(config: RenderConfig) -> Result<Self> {
        config.validate()?;
        let graphics_device: Arc<Mutex<dyn GraphicsDevice>> = match config.backend {
            BackendKind::DirectMap => Arc::new(Mutex::new(DirectMapDevice::new(config.device_config()))),
            BackendKind::Staged => Arc::new(Mutex::new(StagedDevice::new(config.device_config()))),
        };
        Self::with_device(config, graphics_device)
    }

    /// Create the context on an existing device
    pub fn with_device(config: RenderConfig, graphics_device: Arc<Mutex<dyn GraphicsDevice>>) -> Result<Self> {
        config.validate()?;
        let index_stride = config.dynamic_index_format.size_bytes();
        let vertex_stride = config.dynamic_vertex_stride;

        let device_name = lock_device(&graphics_device)?.name();
        engine_info!(
            "skirmish::RenderContext",
            "Render context created on {} (rings: {} vertices, {} indices, {} sorting)",
            device_name,
            config.vertex_ring_capacity,
            config.index_ring_capacity,
            config.sorting_ring_capacity
        );

        Ok(Self {
            pool: BufferPool::new(Arc::clone(&graphics_device)),
            vertex_ring: RingAllocator::new(
                "vertex ring",
                BufferCategory::Vertex,
                StorageKind::Device,
                vertex_stride,
                config.vertex_ring_capacity,
            ),
            index_ring: RingAllocator::new(
                "index ring",
                BufferCategory::Index,
                StorageKind::Device,
                index_stride,
                config.index_ring_capacity,
            ),
            sorting_vertex_ring: RingAllocator::new(
                "sorting vertex ring",
                BufferCategory::Vertex,
                StorageKind::Cpu,
                vertex_stride,
                config.sorting_ring_capacity,
            ),
            sorting_index_ring: RingAllocator::new(
                "sorting index ring",
                BufferCategory::Index,
                StorageKind::Cpu,
                index_stride,
                config.sorting_ring_capacity,
            ),
            dispatcher: DrawDispatcher::new(),
            texture_inbox: TextureInbox::new(),
            frame_index: 0,
            graphics_device,
            config,
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn graphics_device(&self) -> &Arc<Mutex<dyn GraphicsDevice>> {
        &self.graphics_device
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn cache(&self) -> &RenderStateCache {
        self.dispatcher.cache()
    }

    /// Frames begun so far
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    // ===== BUFFERS =====

    /// Create a buffer resource owned by the caller (owner count 1)
    pub fn create_buffer(&mut self, desc: &BufferResourceDesc) -> Result<BufferHandle> {
        self.pool.create(desc)
    }

    pub fn add_ref(&mut self, handle: BufferHandle) -> Result<u32> {
        self.pool.add_ref(handle)
    }

    pub fn release(&mut self, handle: BufferHandle) -> Result<u32> {
        self.pool.release(handle)
    }

    /// Write-lock `[start, start + count)` of a resource created with `create_buffer`
    pub fn lock(&mut self, handle: BufferHandle, start: u32, count: u32, mode: LockMode) -> Result<LockScope> {
        let scope = self.pool.lock(handle, start, count, mode)?;
        self.dispatcher.stats_mut().locks += 1;
        if self.config.enable_validation {
            engine_trace!("skirmish::RenderContext", "Locked {:?} [{}, +{}) {:?}", handle, start, count, mode);
        }
        Ok(scope)
    }

    /// Ring-allocate `count` vertices of the dynamic vertex format
    pub fn acquire_vertices(&mut self, count: u32) -> Result<LockScope> {
        acquire_counted(&mut self.vertex_ring, &mut self.pool, self.dispatcher.stats_mut(), count)
    }

    /// Ring-allocate `count` indices of the dynamic index format
    pub fn acquire_indices(&mut self, count: u32) -> Result<LockScope> {
        acquire_counted(&mut self.index_ring, &mut self.pool, self.dispatcher.stats_mut(), count)
    }

    /// Ring-allocate `count` CPU-side vertices (sorting geometry)
    pub fn acquire_sorting_vertices(&mut self, count: u32) -> Result<LockScope> {
        acquire_counted(&mut self.sorting_vertex_ring, &mut self.pool, self.dispatcher.stats_mut(), count)
    }

    /// Ring-allocate `count` CPU-side indices (sorting geometry)
    pub fn acquire_sorting_indices(&mut self, count: u32) -> Result<LockScope> {
        acquire_counted(&mut self.sorting_index_ring, &mut self.pool, self.dispatcher.stats_mut(), count)
    }

    // ===== STATE =====

    pub fn set_transform(&mut self, slot: TransformSlot, matrix: &Mat4) {
        self.dispatcher.cache_mut().set_transform(slot, matrix);
    }

    pub fn set_world_identity(&mut self) {
        self.dispatcher.cache_mut().set_world_identity();
    }

    pub fn set_view_identity(&mut self) {
        self.dispatcher.cache_mut().set_view_identity();
    }

    pub fn set_shader(&mut self, shader: &ShaderDesc) {
        self.dispatcher.cache_mut().set_shader(shader);
    }

    pub fn set_material(&mut self, material: Option<&MaterialDesc>) {
        self.dispatcher.cache_mut().set_material(material);
    }

    pub fn set_texture(&mut self, stage: usize, texture: Option<&TextureRef>) -> Result<()> {
        self.dispatcher.cache_mut().set_texture(stage, texture)
    }

    pub fn set_light(&mut self, index: usize, light: Option<&Light>) -> Result<()> {
        self.dispatcher.cache_mut().set_light(index, light)
    }

    pub fn set_vertex_buffer(&mut self, stream: usize, handle: Option<BufferHandle>) -> Result<()> {
        self.dispatcher.cache_mut().set_vertex_buffer(&mut self.pool, stream, handle)
    }

    pub fn set_index_buffer(&mut self, handle: Option<BufferHandle>, base_offset: i32) -> Result<()> {
        self.dispatcher.cache_mut().set_index_buffer(&mut self.pool, handle, base_offset)
    }

    /// Bind a range returned by a released ring scope to vertex stream 0
    pub fn set_dynamic_vertex_buffer(&mut self, range: &LockedRange) -> Result<()> {
        self.dispatcher.cache_mut().set_dynamic_vertex_buffer(&mut self.pool, range)
    }

    /// Bind a range returned by a released ring scope as the index buffer
    pub fn set_dynamic_index_buffer(&mut self, range: &LockedRange, base_offset: i32) -> Result<()> {
        self.dispatcher.cache_mut().set_dynamic_index_buffer(&mut self.pool, range, base_offset)
    }

    /// Copy of the whole pending render state
    pub fn snapshot_state(&self) -> RenderState {
        self.dispatcher.cache().snapshot()
    }

    /// Restore a snapshot taken with `snapshot_state`
    pub fn restore_state(&mut self, state: &RenderState) -> Result<()> {
        self.dispatcher.cache_mut().restore(&mut self.pool, state)
    }

    // ===== DRAWING =====

    /// Draw with the bound buffers
    ///
    /// # Arguments
    ///
    /// * `primitive` - Topology
    /// * `start` - First index (indexed) or first vertex, relative to the bound range
    /// * `primitive_count` - Number of primitives
    pub fn draw(&mut self, primitive: PrimitiveKind, start: u32, primitive_count: u32) -> Result<()> {
        self.submit(DrawCall::new(primitive, start, primitive_count))
    }

    /// Indexed draw that declares the vertex range it references
    pub fn draw_range(
        &mut self,
        primitive: PrimitiveKind,
        start: u32,
        primitive_count: u32,
        min_vertex: u32,
        vertex_count: u32,
    ) -> Result<()> {
        self.submit(DrawCall::new(primitive, start, primitive_count).with_vertex_range(min_vertex, vertex_count))
    }

    fn is_cpu(&self, handle: BufferHandle) -> bool {
        self.pool
            .get(handle)
            .is_some_and(|resource| resource.storage_kind() == StorageKind::Cpu)
    }

    fn submit(&mut self, call: DrawCall) -> Result<()> {
        let pending = self.dispatcher.cache().pending();
        let (vertex, index) = (pending.vertex_buffers[0], pending.index_buffer);
        let sorting = vertex.is_some_and(|vb| self.is_cpu(vb.handle))
            || index.is_some_and(|ib| self.is_cpu(ib.handle));

        match vertex {
            Some(vertex) if sorting && call.primitive_count > 0 => self.draw_sorting(call, vertex, index),
            _ => self.dispatcher.draw(&self.pool, &self.graphics_device, &call),
        }
    }

    /// Copy CPU-resident geometry into the device rings and draw from there
    fn draw_sorting(&mut self, call: DrawCall, vertex: VertexBinding, index: Option<IndexBinding>) -> Result<()> {
        if lock_device(&self.graphics_device)?.is_lost() {
            engine_debug!("skirmish::RenderContext", "Device lost, sorting draw skipped");
            return Ok(());
        }
        let elements = call.primitive.element_count(call.primitive_count);
        let indices = match index {
            Some(ib) if self.is_cpu(ib.handle) => Some(self.read_indices(&ib, call.start, elements)?),
            _ => None,
        };

        let mut call = call;
        let mut bindings = BufferBindings {
            vertex: self.dispatcher.cache().pending().vertex_buffers,
            index,
        };

        if self.is_cpu(vertex.handle) {
            let base = match index {
                Some(ib) => Some(vertex.base_vertex as i64 + ib.base_offset as i64),
                None => None,
            };
            let (first, count) = match (base, &indices, call.vertex_range) {
                (None, _, _) => (vertex.base_vertex as i64 + call.start as i64, elements),
                (Some(base), Some(values), _) => {
                    let min = values.iter().copied().min().unwrap_or(0);
                    let max = values.iter().copied().max().unwrap_or(0);
                    (base + min as i64, max - min + 1)
                }
                (Some(base), None, Some((min_vertex, vertex_count))) => (base + min_vertex as i64, vertex_count),
                (Some(_), None, None) => {
                    return Err(Error::InvalidResource(
                        "Indexed draw from CPU vertices with device indices needs a vertex range".to_string(),
                    ));
                }
            };
            let first = u32::try_from(first).map_err(|_| {
                Error::InvalidResource(format!("Sorting draw references negative vertex {}", first))
            })?;

            let range = self.copy_vertices(&vertex, first, count)?;
            bindings.vertex[0] = Some(VertexBinding { handle: range.handle, stride: vertex.stride, base_vertex: range.start });
            match (base, bindings.index.as_mut()) {
                (Some(base), Some(ib)) => {
                    ib.base_offset = (base - first as i64) as i32;
                    call.vertex_range = Some(((first as i64 - base) as u32, count));
                }
                _ => call.start = 0,
            }
        }

        if let Some(values) = indices {
            let range = self.copy_indices(&values)?;
            let base_offset = bindings.index.map_or(0, |ib| ib.base_offset);
            bindings.index = Some(IndexBinding { handle: range.handle, start_index: range.start, base_offset });
            call.start = 0;
        }

        self.dispatcher.stats_mut().sorting_draws += 1;
        self.dispatcher.draw_with_bindings(&self.pool, &self.graphics_device, &call, &bindings)
    }

    fn read_indices(&self, binding: &IndexBinding, start: u32, count: u32) -> Result<Vec<u32>> {
        let resource = self
            .pool
            .get(binding.handle)
            .ok_or_else(|| Error::InvalidResource(format!("Unknown buffer handle {:?}", binding.handle)))?;
        let format = resource.index_format().unwrap_or(IndexFormat::U16);
        let size = format.size_bytes() as usize;
        let first = (binding.start_index + start) as usize;
        let bytes = resource.read_cpu(first * size, count as usize * size)?;
        Ok((0..count as usize).filter_map(|i| format.read(&bytes, i)).collect())
    }

    fn copy_vertices(&mut self, binding: &VertexBinding, first: u32, count: u32) -> Result<LockedRange> {
        if binding.stride != self.vertex_ring.stride() {
            return Err(Error::InvalidResource(format!(
                "Sorting vertices of stride {} cannot use the {}-byte vertex ring",
                binding.stride,
                self.vertex_ring.stride()
            )));
        }
        let stride = binding.stride as usize;
        let bytes = self
            .pool
            .get(binding.handle)
            .ok_or_else(|| Error::InvalidResource(format!("Unknown buffer handle {:?}", binding.handle)))?
            .read_cpu(first as usize * stride, count as usize * stride)?;

        let mut scope = self.acquire_vertices(count)?;
        scope.write_bytes(0, &bytes)?;
        scope.release()
    }

    fn copy_indices(&mut self, values: &[u32]) -> Result<LockedRange> {
        let mut scope = self.acquire_indices(values.len() as u32)?;
        match self.config.dynamic_index_format {
            IndexFormat::U16 => {
                let narrowed = values
                    .iter()
                    .map(|&v| u16::try_from(v))
                    .collect::<std::result::Result<Vec<u16>, _>>()
                    .map_err(|_| Error::InvalidResource("Sorting index exceeds the 16-bit index ring".to_string()))?;
                scope.write(0, &narrowed)?;
            }
            IndexFormat::U32 => scope.write(0, values)?,
        }
        scope.release()
    }

    // ===== FRAMES =====

    /// Start a frame: advance ring epochs and reset the frame statistics
    pub fn begin_frame(&mut self) -> Result<()> {
        for ring in [
            &mut self.vertex_ring,
            &mut self.index_ring,
            &mut self.sorting_vertex_ring,
            &mut self.sorting_index_ring,
        ] {
            ring.begin_frame();
        }
        self.dispatcher.reset_stats();
        self.frame_index += 1;
        lock_device(&self.graphics_device)?.begin_frame()
    }

    /// Submit the frame
    ///
    /// `FrameStatus::DeviceLost` means nothing was presented; call
    /// `recover_device` before the next frame.
    pub fn end_frame(&mut self) -> Result<FrameStatus> {
        let status = lock_device(&self.graphics_device)?.end_frame()?;
        if status == FrameStatus::DeviceLost {
            engine_warn!("skirmish::RenderContext", "Device lost during frame {}", self.frame_index);
        }
        Ok(status)
    }

    pub fn is_device_lost(&self) -> Result<bool> {
        Ok(lock_device(&self.graphics_device)?.is_lost())
    }

    /// Rebuild every native resource after a device loss
    ///
    /// Static buffers are refilled from their shadow copies, ring cursors
    /// restart at zero and the whole render state is reapplied on the next
    /// draw. Handles and bindings stay valid.
    ///
    /// # Returns
    ///
    /// Number of buffers recreated
    pub fn recover_device(&mut self) -> Result<usize> {
        lock_device(&self.graphics_device)?.reset()?;
        self.pool.on_device_lost();
        let restored = self.pool.restore()?;
        for ring in [
            &mut self.vertex_ring,
            &mut self.index_ring,
            &mut self.sorting_vertex_ring,
            &mut self.sorting_index_ring,
        ] {
            ring.reset_cursor()?;
        }
        self.dispatcher.cache_mut().invalidate_all();
        engine_info!("skirmish::RenderContext", "Device recovered, {} buffers restored", restored);
        Ok(restored)
    }

    // ===== STATISTICS =====

    /// Statistics of the current frame
    pub fn stats(&self) -> RenderStats {
        *self.dispatcher.stats()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn device_stats(&self) -> Result<GraphicsDeviceStats> {
        Ok(lock_device(&self.graphics_device)?.stats())
    }

    // ===== TEXTURES =====

    /// Create a native texture from decoded pixels
    pub fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureRef> {
        let texture = lock_device(&self.graphics_device)?.create_texture(desc)?;
        Ok(TextureRef::new(texture))
    }

    /// Sender for loader threads
    pub fn texture_sender(&self) -> TextureSender {
        self.texture_inbox.sender()
    }

    /// Create the textures queued by loader threads since the last call
    pub fn process_texture_uploads(&mut self) -> Result<Vec<(String, TextureRef)>> {
        let uploads = self.texture_inbox.drain();
        let mut created = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let texture = self.create_texture(&upload.desc)?;
            engine_debug!("skirmish::RenderContext", "Texture '{}' created", upload.name);
            created.push((upload.name, texture));
        }
        Ok(created)
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        if let Err(e) = self.dispatcher.cache_mut().release_bindings(&mut self.pool) {
            engine_error!("skirmish::RenderContext", "Failed to release bindings: {}", e);
        }
        for ring in [
            &mut self.vertex_ring,
            &mut self.index_ring,
            &mut self.sorting_vertex_ring,
            &mut self.sorting_index_ring,
        ] {
            if let Err(e) = ring.release_storage(&mut self.pool) {
                engine_error!("skirmish::RenderContext", "Failed to release {}: {}", ring.name(), e);
            }
        }
    }
}

#[cfg(test)]
#[path = "render_context_tests.rs"]
mod tests;
