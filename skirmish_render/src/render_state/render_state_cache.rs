/// Render State Cache - pending vs applied fixed-function state
///
/// Setters only touch the pending snapshot and mark the changed field dirty;
/// setting a value equal to the pending one is a no-op. `flush` walks the
/// dirty fields in a fixed order (transforms, lights, material, shader,
/// textures, buffers) and issues a native call only where the pending value
/// differs from what the device last received. Lights follow transforms
/// because they are specified in view space.

use bitflags::bitflags;
use glam::Mat4;

use crate::dynamic::LockedRange;
use crate::error::{Error, Result};
use crate::graphics_device::{
    BufferCategory, GraphicsDevice, IndexFormat, Light, MaterialDesc, ShaderDesc, TextureRef,
    TransformSlot, MAX_LIGHTS, MAX_TEXTURE_STAGES, MAX_VERTEX_STREAMS,
};
use crate::render_state::RenderStats;
use crate::resource::{BufferHandle, BufferPool};

bitflags! {
    /// Render state fields
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DirtyFlags: u32 {
        const WORLD = 1 << 0;
        const VIEW = 1 << 1;
        const LIGHT0 = 1 << 2;
        const LIGHT1 = 1 << 3;
        const LIGHT2 = 1 << 4;
        const LIGHT3 = 1 << 5;
        const MATERIAL = 1 << 6;
        const SHADER = 1 << 7;
        const TEXTURE0 = 1 << 8;
        const TEXTURE1 = 1 << 9;
        const TEXTURE2 = 1 << 10;
        const TEXTURE3 = 1 << 11;
        const TEXTURE4 = 1 << 12;
        const TEXTURE5 = 1 << 13;
        const TEXTURE6 = 1 << 14;
        const TEXTURE7 = 1 << 15;
        const VERTEX_BUFFER0 = 1 << 16;
        const VERTEX_BUFFER1 = 1 << 17;
        const INDEX_BUFFER = 1 << 18;

        const TRANSFORMS = Self::WORLD.bits() | Self::VIEW.bits();
        const LIGHTS = Self::LIGHT0.bits() | Self::LIGHT1.bits() | Self::LIGHT2.bits() | Self::LIGHT3.bits();
        const TEXTURES = 0xFF << 8;
        const BUFFERS = Self::VERTEX_BUFFER0.bits() | Self::VERTEX_BUFFER1.bits() | Self::INDEX_BUFFER.bits();
    }
}

impl DirtyFlags {
    /// Flag of light slot `index`
    pub fn light(index: usize) -> Self {
        debug_assert!(index < MAX_LIGHTS);
        Self::from_bits_truncate(Self::LIGHT0.bits() << index)
    }

    /// Flag of texture stage `stage`
    pub fn texture(stage: usize) -> Self {
        debug_assert!(stage < MAX_TEXTURE_STAGES);
        Self::from_bits_truncate(Self::TEXTURE0.bits() << stage)
    }

    /// Flag of vertex stream `stream`
    pub fn vertex_buffer(stream: usize) -> Self {
        debug_assert!(stream < MAX_VERTEX_STREAMS);
        Self::from_bits_truncate(Self::VERTEX_BUFFER0.bits() << stream)
    }
}

/// Vertex stream binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBinding {
    pub handle: BufferHandle,
    /// Vertex size in bytes
    pub stride: u32,
    /// Added to every start vertex (first element of a ring range)
    pub base_vertex: u32,
}

/// Index buffer binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBinding {
    pub handle: BufferHandle,
    /// Added to every start index (first element of a ring range)
    pub start_index: u32,
    /// Added to every index before fetching a vertex
    pub base_offset: i32,
}

/// Buffer bindings used by one flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct BufferBindings {
    pub vertex: [Option<VertexBinding>; MAX_VERTEX_STREAMS],
    pub index: Option<IndexBinding>,
}

/// Complete fixed-function state
#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    pub world: Mat4,
    pub view: Mat4,
    pub world_identity: bool,
    pub view_identity: bool,
    pub shader: ShaderDesc,
    pub material: Option<MaterialDesc>,
    pub textures: [Option<TextureRef>; MAX_TEXTURE_STAGES],
    pub lights: [Option<Light>; MAX_LIGHTS],
    pub vertex_buffers: [Option<VertexBinding>; MAX_VERTEX_STREAMS],
    pub index_buffer: Option<IndexBinding>,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            world: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            world_identity: true,
            view_identity: true,
            shader: ShaderDesc::default(),
            material: None,
            textures: Default::default(),
            lights: [None; MAX_LIGHTS],
            vertex_buffers: [None; MAX_VERTEX_STREAMS],
            index_buffer: None,
        }
    }
}

/// Pending / applied render state with dirty tracking
pub struct RenderStateCache {
    pending: RenderState,
    applied: RenderState,
    dirty: DirtyFlags,
    /// Fields whose applied value is known to match the device
    valid: DirtyFlags,
}

impl Default for RenderStateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderStateCache {
    /// Create a cache that assumes nothing about the device
    pub fn new() -> Self {
        Self {
            pending: RenderState::default(),
            applied: RenderState::default(),
            dirty: DirtyFlags::all(),
            valid: DirtyFlags::empty(),
        }
    }

    pub fn pending(&self) -> &RenderState {
        &self.pending
    }

    /// State last sent to the device
    pub fn applied(&self) -> &RenderState {
        &self.applied
    }

    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    // ===== TRANSFORMS =====

    /// Set an explicit matrix; the slot stops being tracked as identity
    /// even when `matrix` equals it
    pub fn set_transform(&mut self, slot: TransformSlot, matrix: &Mat4) {
        let (current, current_identity, flag) = match slot {
            TransformSlot::World => (&mut self.pending.world, &mut self.pending.world_identity, DirtyFlags::WORLD),
            TransformSlot::View => (&mut self.pending.view, &mut self.pending.view_identity, DirtyFlags::VIEW),
        };
        if *current != *matrix || *current_identity {
            *current = *matrix;
            *current_identity = false;
            self.dirty |= flag;
        }
    }

    /// Reset the world transform to identity without comparing matrices
    pub fn set_world_identity(&mut self) {
        if !self.pending.world_identity {
            self.pending.world = Mat4::IDENTITY;
            self.pending.world_identity = true;
            self.dirty |= DirtyFlags::WORLD;
        }
    }

    /// Reset the view transform to identity without comparing matrices
    pub fn set_view_identity(&mut self) {
        if !self.pending.view_identity {
            self.pending.view = Mat4::IDENTITY;
            self.pending.view_identity = true;
            self.dirty |= DirtyFlags::VIEW;
        }
    }

    // ===== LIGHTING, MATERIAL, SHADER, TEXTURES =====

    pub fn set_light(&mut self, index: usize, light: Option<&Light>) -> Result<()> {
        if index >= MAX_LIGHTS {
            return Err(Error::InvalidResource(format!("Light index {} out of range", index)));
        }
        let light = light.copied();
        if self.pending.lights[index] != light {
            self.pending.lights[index] = light;
            self.dirty |= DirtyFlags::light(index);
        }
        Ok(())
    }

    pub fn set_material(&mut self, material: Option<&MaterialDesc>) {
        let material = material.copied();
        if self.pending.material != material {
            self.pending.material = material;
            self.dirty |= DirtyFlags::MATERIAL;
        }
    }

    pub fn set_shader(&mut self, shader: &ShaderDesc) {
        if self.pending.shader != *shader {
            self.pending.shader = *shader;
            self.dirty |= DirtyFlags::SHADER;
        }
    }

    pub fn set_texture(&mut self, stage: usize, texture: Option<&TextureRef>) -> Result<()> {
        if stage >= MAX_TEXTURE_STAGES {
            return Err(Error::InvalidResource(format!("Texture stage {} out of range", stage)));
        }
        if self.pending.textures[stage].as_ref() != texture {
            self.pending.textures[stage] = texture.cloned();
            self.dirty |= DirtyFlags::texture(stage);
        }
        Ok(())
    }

    // ===== BUFFERS =====

    /// Bind a whole vertex resource to `stream`
    pub fn set_vertex_buffer(&mut self, pool: &mut BufferPool, stream: usize, handle: Option<BufferHandle>) -> Result<()> {
        let binding = match handle {
            Some(handle) => Some(VertexBinding { handle, stride: Self::vertex_stride(pool, handle)?, base_vertex: 0 }),
            None => None,
        };
        self.bind_vertex(pool, stream, binding)
    }

    /// Bind a ring-allocated vertex range to stream 0
    pub fn set_dynamic_vertex_buffer(&mut self, pool: &mut BufferPool, range: &LockedRange) -> Result<()> {
        let binding = VertexBinding {
            handle: range.handle,
            stride: Self::vertex_stride(pool, range.handle)?,
            base_vertex: range.start,
        };
        self.bind_vertex(pool, 0, Some(binding))
    }

    /// Bind a whole index resource
    pub fn set_index_buffer(&mut self, pool: &mut BufferPool, handle: Option<BufferHandle>, base_offset: i32) -> Result<()> {
        let binding = handle.map(|handle| IndexBinding { handle, start_index: 0, base_offset });
        self.bind_index(pool, binding)
    }

    /// Bind a ring-allocated index range
    pub fn set_dynamic_index_buffer(&mut self, pool: &mut BufferPool, range: &LockedRange, base_offset: i32) -> Result<()> {
        let binding = IndexBinding { handle: range.handle, start_index: range.start, base_offset };
        self.bind_index(pool, Some(binding))
    }

    fn vertex_stride(pool: &BufferPool, handle: BufferHandle) -> Result<u32> {
        let resource = pool
            .get(handle)
            .ok_or_else(|| Error::InvalidResource(format!("Unknown buffer handle {:?}", handle)))?;
        if resource.category() != BufferCategory::Vertex {
            return Err(Error::InvalidResource(format!("Buffer {:?} is not a vertex buffer", handle)));
        }
        Ok(resource.stride())
    }

    fn bind_vertex(&mut self, pool: &mut BufferPool, stream: usize, binding: Option<VertexBinding>) -> Result<()> {
        if stream >= MAX_VERTEX_STREAMS {
            return Err(Error::InvalidResource(format!("Vertex stream {} out of range", stream)));
        }
        let previous = self.pending.vertex_buffers[stream];
        if previous == binding {
            return Ok(());
        }
        if let Some(new) = binding {
            pool.add_engine_ref(new.handle)?;
        }
        if let Some(old) = previous {
            pool.release_engine_ref(old.handle)?;
        }
        self.pending.vertex_buffers[stream] = binding;
        self.dirty |= DirtyFlags::vertex_buffer(stream);
        Ok(())
    }

    fn bind_index(&mut self, pool: &mut BufferPool, binding: Option<IndexBinding>) -> Result<()> {
        let previous = self.pending.index_buffer;
        if previous == binding {
            return Ok(());
        }
        if let Some(new) = binding {
            let is_index = pool.get(new.handle).is_some_and(|r| r.category() == BufferCategory::Index);
            if !is_index {
                return Err(Error::InvalidResource(format!("Buffer {:?} is not an index buffer", new.handle)));
            }
            pool.add_engine_ref(new.handle)?;
        }
        if let Some(old) = previous {
            pool.release_engine_ref(old.handle)?;
        }
        self.pending.index_buffer = binding;
        self.dirty |= DirtyFlags::INDEX_BUFFER;
        Ok(())
    }

    /// Unbind every buffer, dropping the engine references the cache holds
    pub fn release_bindings(&mut self, pool: &mut BufferPool) -> Result<()> {
        for stream in 0..MAX_VERTEX_STREAMS {
            self.bind_vertex(pool, stream, None)?;
        }
        self.bind_index(pool, None)
    }

    // ===== SNAPSHOTS =====

    /// Copy of the whole pending state
    pub fn snapshot(&self) -> RenderState {
        self.pending.clone()
    }

    /// Replace the pending state, moving engine references to the restored
    /// bindings and marking every field dirty
    pub fn restore(&mut self, pool: &mut BufferPool, state: &RenderState) -> Result<()> {
        for stream in 0..MAX_VERTEX_STREAMS {
            self.bind_vertex(pool, stream, state.vertex_buffers[stream])?;
        }
        self.bind_index(pool, state.index_buffer)?;
        self.pending = state.clone();
        self.invalidate_all();
        Ok(())
    }

    /// Forget what the device holds; the next flush reapplies every field
    pub fn invalidate_all(&mut self) {
        self.dirty = DirtyFlags::all();
        self.valid = DirtyFlags::empty();
    }

    // ===== FLUSH =====

    /// Send every dirty field to the device, in order
    pub fn flush(&mut self, pool: &BufferPool, device: &mut dyn GraphicsDevice, stats: &mut RenderStats) -> Result<()> {
        self.flush_with(pool, device, stats, None)
    }

    /// True when `flag` can be skipped because the device already has the value
    fn redundant(&self, flag: DirtyFlags, equal: bool, stats: &mut RenderStats) -> bool {
        let skip = equal && self.valid.contains(flag);
        if skip {
            stats.redundant_skips += 1;
        }
        skip
    }

    /// Flush, optionally binding `substitute` buffers in place of the pending ones
    ///
    /// A substituted flush leaves the buffer fields dirty so the next regular
    /// flush rebinds the pending buffers.
    pub(crate) fn flush_with(
        &mut self,
        pool: &BufferPool,
        device: &mut dyn GraphicsDevice,
        stats: &mut RenderStats,
        substitute: Option<&BufferBindings>,
    ) -> Result<()> {
        let mut dirty = self.dirty;
        if substitute.is_some() {
            dirty |= DirtyFlags::BUFFERS;
        }

        // Transforms
        for (slot, flag) in [(TransformSlot::World, DirtyFlags::WORLD), (TransformSlot::View, DirtyFlags::VIEW)] {
            if !dirty.contains(flag) {
                continue;
            }
            let (pending, applied) = match slot {
                TransformSlot::World => (self.pending.world, self.applied.world),
                TransformSlot::View => (self.pending.view, self.applied.view),
            };
            if !self.redundant(flag, pending == applied, stats) {
                device.set_transform(slot, &pending)?;
                stats.transform_sets += 1;
                self.valid |= flag;
            }
            match slot {
                TransformSlot::World => {
                    self.applied.world = pending;
                    self.applied.world_identity = self.pending.world_identity;
                }
                TransformSlot::View => {
                    self.applied.view = pending;
                    self.applied.view_identity = self.pending.view_identity;
                }
            }
        }

        // Lights
        for index in 0..MAX_LIGHTS {
            let flag = DirtyFlags::light(index);
            if !dirty.contains(flag) {
                continue;
            }
            let light = self.pending.lights[index];
            if !self.redundant(flag, light == self.applied.lights[index], stats) {
                device.set_light(index, light.as_ref())?;
                stats.light_sets += 1;
                self.valid |= flag;
            }
            self.applied.lights[index] = light;
        }

        // Material
        if dirty.contains(DirtyFlags::MATERIAL) {
            let material = self.pending.material;
            if !self.redundant(DirtyFlags::MATERIAL, material == self.applied.material, stats) {
                device.set_material(material.as_ref())?;
                stats.material_sets += 1;
                self.valid |= DirtyFlags::MATERIAL;
            }
            self.applied.material = material;
        }

        // Shader
        if dirty.contains(DirtyFlags::SHADER) {
            let shader = self.pending.shader;
            if !self.redundant(DirtyFlags::SHADER, shader == self.applied.shader, stats) {
                device.set_shader(&shader)?;
                stats.shader_sets += 1;
                self.valid |= DirtyFlags::SHADER;
            }
            self.applied.shader = shader;
        }

        // Textures
        for stage in 0..MAX_TEXTURE_STAGES {
            let flag = DirtyFlags::texture(stage);
            if !dirty.contains(flag) {
                continue;
            }
            let texture = self.pending.textures[stage].clone();
            if !self.redundant(flag, texture == self.applied.textures[stage], stats) {
                device.set_texture(stage, texture.as_ref().map(TextureRef::texture))?;
                stats.texture_sets += 1;
                self.valid |= flag;
            }
            self.applied.textures[stage] = texture;
        }

        // Buffers
        let bindings = match substitute {
            Some(bindings) => *bindings,
            None => BufferBindings {
                vertex: self.pending.vertex_buffers,
                index: self.pending.index_buffer,
            },
        };
        for stream in 0..MAX_VERTEX_STREAMS {
            let flag = DirtyFlags::vertex_buffer(stream);
            if !dirty.contains(flag) {
                continue;
            }
            let wanted = bindings.vertex[stream];
            let key = |binding: Option<VertexBinding>| binding.map(|b| (b.handle, b.stride));
            if !self.redundant(flag, key(wanted) == key(self.applied.vertex_buffers[stream]), stats) {
                let buffer = match wanted {
                    Some(binding) => Some(pool.device_buffer(binding.handle)?),
                    None => None,
                };
                device.set_vertex_buffer(stream, buffer.as_ref(), wanted.map_or(0, |b| b.stride))?;
                stats.buffer_sets += 1;
                self.valid |= flag;
            }
            self.applied.vertex_buffers[stream] = wanted;
        }

        if dirty.contains(DirtyFlags::INDEX_BUFFER) {
            let wanted = bindings.index;
            let key = |binding: Option<IndexBinding>| binding.map(|b| b.handle);
            if !self.redundant(DirtyFlags::INDEX_BUFFER, key(wanted) == key(self.applied.index_buffer), stats) {
                let (buffer, format) = match wanted {
                    Some(binding) => {
                        let format = pool
                            .get(binding.handle)
                            .and_then(|r| r.index_format())
                            .unwrap_or(IndexFormat::U16);
                        (Some(pool.device_buffer(binding.handle)?), format)
                    }
                    None => (None, IndexFormat::U16),
                };
                device.set_index_buffer(buffer.as_ref(), format)?;
                stats.buffer_sets += 1;
                self.valid |= DirtyFlags::INDEX_BUFFER;
            }
            self.applied.index_buffer = wanted;
        }

        self.dirty = if substitute.is_some() { DirtyFlags::BUFFERS } else { DirtyFlags::empty() };
        Ok(())
    }
}

#[cfg(test)]
#[path = "render_state_cache_tests.rs"]
mod tests;
