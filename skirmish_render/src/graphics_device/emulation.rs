/// Headless emulated graphics device
///
/// Both shipped backends share this pipeline and differ only in their buffer
/// write path (`WritePath`). The pipeline behaves like a real GPU in the ways
/// the render layer depends on:
///
/// - draws are queued and executed later, `frame_latency` frames after submit
/// - a queued draw reads vertex and index bytes only when it executes, so a CPU
///   write that lands before execution changes what the draw sees
/// - native buffers are charged against a memory budget
/// - the device can be lost and reset, invalidating every native resource
///
/// Every native call is appended to a call log, and every executed draw is
/// recorded with the bytes it actually fetched.

use std::any::Any;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::{Arc, Mutex};
use glam::Mat4;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::graphics_device::memory::{MemoryBlock, MemoryBudget, MemoryReservation};
use crate::graphics_device::{
    Buffer, BufferCategory, BufferDesc, BufferWriter, FrameStatus, GraphicsDevice,
    GraphicsDeviceStats, IndexFormat, Light, MapHint, MaterialDesc, PrimitiveKind, ShaderDesc,
    Texture, TextureDesc, TextureInfo, TransformSlot, WriteModel, MAX_LIGHTS,
    MAX_TEXTURE_STAGES, MAX_VERTEX_STREAMS,
};
use crate::{engine_debug, engine_err, engine_warn};

// ============================================================================
// Configuration and records
// ============================================================================

/// Emulated device settings
#[derive(Debug, Clone)]
pub struct EmulatedDeviceConfig {
    /// Native buffer memory available (bytes)
    pub memory_budget: u64,
    /// Frames submitted but not yet executed
    pub frame_latency: usize,
    /// Warn about overlapping CPU writes and out-of-range fetches
    pub enable_validation: bool,
}

impl Default for EmulatedDeviceConfig {
    fn default() -> Self {
        Self {
            memory_budget: 64 * 1024 * 1024,
            frame_latency: 1,
            enable_validation: cfg!(debug_assertions),
        }
    }
}

/// One native call, as issued by the render layer
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCall {
    CreateBuffer { buffer: u64, size: u64 },
    CreateTexture { texture: u64 },
    SetTransform(TransformSlot),
    SetLight { index: usize, enabled: bool },
    SetMaterial { enabled: bool },
    SetShader,
    SetTexture { stage: usize, texture: Option<u64> },
    SetVertexBuffer { stream: usize, buffer: Option<u64>, stride: u32 },
    SetIndexBuffer { buffer: Option<u64>, format: IndexFormat },
    Map { buffer: u64, offset: u64, size: u64, hint: MapHint },
    Unmap { buffer: u64 },
    Upload { buffer: u64, offset: u64, size: u64 },
    Draw { primitive: PrimitiveKind, start_vertex: u32, primitive_count: u32 },
    DrawIndexed { primitive: PrimitiveKind, base_vertex: i32, start_index: u32, primitive_count: u32 },
    BeginFrame,
    EndFrame,
    Reset,
}

impl NativeCall {
    /// Whether this call changes bound state (as opposed to resources or draws)
    pub fn is_state_change(&self) -> bool {
        matches!(
            self,
            NativeCall::SetTransform(_)
                | NativeCall::SetLight { .. }
                | NativeCall::SetMaterial { .. }
                | NativeCall::SetShader
                | NativeCall::SetTexture { .. }
                | NativeCall::SetVertexBuffer { .. }
                | NativeCall::SetIndexBuffer { .. }
        )
    }
}

/// Fixed-function state captured when a draw was recorded
#[derive(Debug, Clone, PartialEq)]
pub struct DrawState {
    pub world: Mat4,
    pub view: Mat4,
    pub lights: [Option<Light>; MAX_LIGHTS],
    pub material: Option<MaterialDesc>,
    pub shader: ShaderDesc,
    /// Texture ids per stage
    pub textures: [Option<u64>; MAX_TEXTURE_STAGES],
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            world: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            lights: [None; MAX_LIGHTS],
            material: None,
            shader: ShaderDesc::default(),
            textures: [None; MAX_TEXTURE_STAGES],
        }
    }
}

/// A draw as executed by the emulated GPU
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    /// Frame the draw was recorded in
    pub frame: u64,
    pub primitive: PrimitiveKind,
    pub primitive_count: u32,
    pub vertex_stride: u32,
    /// Vertex bytes fetched, in fetch order
    pub vertices: Vec<u8>,
    /// Indices read, empty for non-indexed draws
    pub indices: Vec<u32>,
    /// A fetch fell outside the bound buffer
    pub out_of_range: bool,
    pub state: DrawState,
}

impl DrawRecord {
    /// Decode the fetched vertices
    pub fn vertices_as<T: bytemuck::Pod>(&self) -> Vec<T> {
        bytemuck::pod_collect_to_vec(&self.vertices)
    }
}

// ============================================================================
// Native resources
// ============================================================================

/// Native buffer of an emulated device
pub(crate) struct EmulatedBuffer {
    id: u64,
    generation: u64,
    size: u64,
    category: BufferCategory,
    block: Mutex<Arc<MemoryBlock>>,
    _reservation: MemoryReservation,
}

impl EmulatedBuffer {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Allocation currently backing the buffer
    pub(crate) fn current_block(&self) -> Arc<MemoryBlock> {
        let block = self.block.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&block)
    }

    /// Swap in a fresh zeroed allocation
    pub(crate) fn rename(&self, id: u64) -> Arc<MemoryBlock> {
        let mut block = self.block.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *block = Arc::new(MemoryBlock::new(id, self.size as usize));
        Arc::clone(&block)
    }
}

impl Buffer for EmulatedBuffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn category(&self) -> BufferCategory {
        self.category
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct EmulatedTexture {
    id: u64,
    generation: u64,
    info: TextureInfo,
    _pixels: Vec<u8>,
}

impl Texture for EmulatedTexture {
    fn info(&self) -> &TextureInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Command stream
// ============================================================================

struct QueuedDraw {
    frame: u64,
    primitive: PrimitiveKind,
    primitive_count: u32,
    vertex_block: Arc<MemoryBlock>,
    stride: u32,
    /// Non-indexed start vertex, or base vertex for indexed draws
    first_vertex: i64,
    vertex_read: Range<usize>,
    index: Option<(Arc<MemoryBlock>, IndexFormat, u32)>,
    index_read: Range<usize>,
    state: DrawState,
}

enum Command {
    Copy { block: Arc<MemoryBlock>, offset: usize, data: Vec<u8> },
    Draw(Box<QueuedDraw>),
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

// ============================================================================
// Device
// ============================================================================

/// Buffer write path of an emulated device
pub trait WritePath: Send + Sized + 'static {
    /// Backend name
    const NAME: &'static str;
    /// Kind of write path
    const MODEL: WriteModel;

    /// Expose the device through its write capability
    fn writer(device: &mut EmulatedDevice<Self>) -> BufferWriter<'_>;
}

#[derive(Default)]
struct BoundState {
    state: DrawState,
    streams: [Option<(Arc<dyn Buffer>, u32)>; MAX_VERTEX_STREAMS],
    index: Option<(Arc<dyn Buffer>, IndexFormat)>,
}

/// Emulated device, parameterized by its write path
pub struct EmulatedDevice<P: WritePath> {
    config: EmulatedDeviceConfig,
    budget: MemoryBudget,
    generation: u64,
    next_id: u64,
    lost: bool,
    frame_index: u64,
    calls: Vec<NativeCall>,
    recording: Vec<Command>,
    in_flight: VecDeque<Vec<Command>>,
    executed: Vec<DrawRecord>,
    bound: BoundState,
    pub(crate) mapped: FxHashMap<u64, Arc<MemoryBlock>>,
    stats: GraphicsDeviceStats,
    _path: PhantomData<P>,
}

impl<P: WritePath> EmulatedDevice<P> {
    /// Create a device
    pub fn new(config: EmulatedDeviceConfig) -> Self {
        engine_debug!(
            "skirmish::EmulatedDevice",
            "{} device created (budget {} bytes, latency {})",
            P::NAME, config.memory_budget, config.frame_latency
        );
        Self {
            budget: MemoryBudget::new(config.memory_budget),
            config,
            generation: 0,
            next_id: 1,
            lost: false,
            frame_index: 0,
            calls: Vec::new(),
            recording: Vec::new(),
            in_flight: VecDeque::new(),
            executed: Vec::new(),
            bound: BoundState::default(),
            mapped: FxHashMap::default(),
            stats: GraphicsDeviceStats::default(),
            _path: PhantomData,
        }
    }

    /// Native calls issued so far
    pub fn calls(&self) -> &[NativeCall] {
        &self.calls
    }

    /// Drain the native call log
    pub fn take_calls(&mut self) -> Vec<NativeCall> {
        std::mem::take(&mut self.calls)
    }

    /// Draws executed so far
    pub fn executed_draws(&self) -> &[DrawRecord] {
        &self.executed
    }

    /// Drain the executed draw log
    pub fn take_executed_draws(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.executed)
    }

    /// Mark the device lost, as a driver would after a mode switch
    pub fn simulate_device_loss(&mut self) {
        engine_warn!("skirmish::EmulatedDevice", "{} device lost", P::NAME);
        self.lost = true;
        self.recording.clear();
        self.in_flight.clear();
        self.mapped.clear();
    }

    pub(crate) fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn record_call(&mut self, call: NativeCall) {
        self.stats.native_calls += 1;
        self.calls.push(call);
    }

    pub(crate) fn stats_mut(&mut self) -> &mut GraphicsDeviceStats {
        &mut self.stats
    }

    pub(crate) fn validation_enabled(&self) -> bool {
        self.config.enable_validation
    }

    pub(crate) fn ensure_not_lost(&self) -> Result<()> {
        if self.lost {
            return Err(Error::DeviceLost);
        }
        Ok(())
    }

    /// Resolve a buffer created by this device in its current generation
    pub(crate) fn resolve_buffer<'a>(&self, buffer: &'a Arc<dyn Buffer>) -> Result<&'a EmulatedBuffer> {
        let native = buffer.as_any().downcast_ref::<EmulatedBuffer>().ok_or_else(|| {
            Error::InvalidResource(format!("Buffer was not created by the {} device", P::NAME))
        })?;
        if native.generation != self.generation {
            return Err(Error::InvalidResource(format!(
                "Buffer {} predates the last device reset", native.id
            )));
        }
        Ok(native)
    }

    /// Whether any submitted or recorded draw still reads `block`
    pub(crate) fn block_in_flight(&self, block: &MemoryBlock) -> bool {
        self.queued_draws().any(|draw| {
            draw.vertex_block.id() == block.id()
                || draw.index.as_ref().is_some_and(|(b, _, _)| b.id() == block.id())
        })
    }

    /// Whether a queued draw reads any byte of `range` in `block`
    pub(crate) fn range_in_flight(&self, block: &MemoryBlock, range: &Range<usize>) -> bool {
        self.queued_draws().any(|draw| {
            (draw.vertex_block.id() == block.id() && overlaps(&draw.vertex_read, range))
                || draw
                    .index
                    .as_ref()
                    .is_some_and(|(b, _, _)| b.id() == block.id() && overlaps(&draw.index_read, range))
        })
    }

    /// Queue an ordered copy into `block`
    pub(crate) fn queue_copy(&mut self, block: Arc<MemoryBlock>, offset: usize, data: Vec<u8>) {
        self.recording.push(Command::Copy { block, offset, data });
    }

    fn queued_draws(&self) -> impl Iterator<Item = &QueuedDraw> {
        self.recording
            .iter()
            .chain(self.in_flight.iter().flatten())
            .filter_map(|command| match command {
                Command::Draw(draw) => Some(draw.as_ref()),
                Command::Copy { .. } => None,
            })
    }

    fn stream0(&self) -> Result<(Arc<MemoryBlock>, u32)> {
        let Some((buffer, stride)) = &self.bound.streams[0] else {
            return Err(engine_err!("skirmish::EmulatedDevice", "Draw issued with no vertex buffer on stream 0"));
        };
        let native = self.resolve_buffer(buffer)?;
        Ok((native.current_block(), *stride))
    }

    fn execute(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::Copy { block, offset, data } => {
                    if !block.write(offset, &data) {
                        engine_warn!("skirmish::EmulatedDevice", "Copy of {} bytes at {} out of range", data.len(), offset);
                    }
                }
                Command::Draw(draw) => {
                    let record = self.execute_draw(*draw);
                    self.stats.draws_executed += 1;
                    self.executed.push(record);
                }
            }
        }
    }

    fn execute_draw(&self, draw: QueuedDraw) -> DrawRecord {
        let count = draw.primitive.element_count(draw.primitive_count) as usize;
        let mut out_of_range = false;

        let indices: Vec<u32> = match &draw.index {
            Some((block, format, start)) => {
                let size = format.size_bytes() as usize;
                let bytes = block
                    .read(*start as usize * size, count * size)
                    .unwrap_or_else(|| {
                        out_of_range = true;
                        Vec::new()
                    });
                (0..count).filter_map(|i| format.read(&bytes, i)).collect()
            }
            None => Vec::new(),
        };

        let elements: Vec<i64> = if draw.index.is_some() {
            indices.iter().map(|i| draw.first_vertex + *i as i64).collect()
        } else {
            (0..count as i64).map(|i| draw.first_vertex + i).collect()
        };

        let stride = draw.stride as usize;
        let mut vertices = Vec::with_capacity(elements.len() * stride);
        for element in elements {
            let fetched = usize::try_from(element)
                .ok()
                .and_then(|e| draw.vertex_block.read(e * stride, stride));
            match fetched {
                Some(bytes) => vertices.extend_from_slice(&bytes),
                None => out_of_range = true,
            }
        }

        if out_of_range && self.config.enable_validation {
            engine_warn!("skirmish::EmulatedDevice", "Draw in frame {} fetched outside its buffers", draw.frame);
        }

        DrawRecord {
            frame: draw.frame,
            primitive: draw.primitive,
            primitive_count: draw.primitive_count,
            vertex_stride: draw.stride,
            vertices,
            indices,
            out_of_range,
            state: draw.state,
        }
    }

    fn submit(&mut self) {
        let commands = std::mem::take(&mut self.recording);
        self.in_flight.push_back(commands);
        while self.in_flight.len() > self.config.frame_latency {
            if let Some(oldest) = self.in_flight.pop_front() {
                self.execute(oldest);
            }
        }
    }
}

impl<P: WritePath> GraphicsDevice for EmulatedDevice<P> {
    fn name(&self) -> &'static str {
        P::NAME
    }

    fn write_model(&self) -> WriteModel {
        P::MODEL
    }

    fn buffer_writer(&mut self) -> BufferWriter<'_> {
        P::writer(self)
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>> {
        self.ensure_not_lost()?;
        if desc.size == 0 {
            return Err(Error::InvalidResource("Buffer size must be non-zero".to_string()));
        }
        let reservation = self.budget.reserve(desc.size).ok_or(Error::OutOfMemory)?;
        let id = self.next_id();
        let block_id = self.next_id();
        self.record_call(NativeCall::CreateBuffer { buffer: id, size: desc.size });
        self.stats.buffers_created += 1;

        Ok(Arc::new(EmulatedBuffer {
            id,
            generation: self.generation,
            size: desc.size,
            category: desc.category,
            block: Mutex::new(Arc::new(MemoryBlock::new(block_id, desc.size as usize))),
            _reservation: reservation,
        }))
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<Arc<dyn Texture>> {
        self.ensure_not_lost()?;
        let expected = desc.width as usize * desc.height as usize * desc.format.bytes_per_pixel() as usize;
        if desc.width == 0 || desc.height == 0 || desc.pixels.len() != expected {
            return Err(Error::InvalidResource(format!(
                "Texture {}x{} expects {} bytes, got {}",
                desc.width, desc.height, expected, desc.pixels.len()
            )));
        }
        let id = self.next_id();
        self.record_call(NativeCall::CreateTexture { texture: id });
        Ok(Arc::new(EmulatedTexture {
            id,
            generation: self.generation,
            info: TextureInfo { width: desc.width, height: desc.height, format: desc.format },
            _pixels: desc.pixels.clone(),
        }))
    }

    fn set_transform(&mut self, slot: TransformSlot, matrix: &Mat4) -> Result<()> {
        match slot {
            TransformSlot::World => self.bound.state.world = *matrix,
            TransformSlot::View => self.bound.state.view = *matrix,
        }
        self.record_call(NativeCall::SetTransform(slot));
        Ok(())
    }

    fn set_light(&mut self, index: usize, light: Option<&Light>) -> Result<()> {
        let slot = self.bound.state.lights.get_mut(index).ok_or_else(|| {
            Error::InvalidResource(format!("Light index {} out of range", index))
        })?;
        *slot = light.copied();
        self.record_call(NativeCall::SetLight { index, enabled: light.is_some() });
        Ok(())
    }

    fn set_material(&mut self, material: Option<&MaterialDesc>) -> Result<()> {
        self.bound.state.material = material.copied();
        self.record_call(NativeCall::SetMaterial { enabled: material.is_some() });
        Ok(())
    }

    fn set_shader(&mut self, shader: &ShaderDesc) -> Result<()> {
        self.bound.state.shader = *shader;
        self.record_call(NativeCall::SetShader);
        Ok(())
    }

    fn set_texture(&mut self, stage: usize, texture: Option<&Arc<dyn Texture>>) -> Result<()> {
        if stage >= MAX_TEXTURE_STAGES {
            return Err(Error::InvalidResource(format!("Texture stage {} out of range", stage)));
        }
        let id = match texture {
            Some(texture) => {
                let native = texture.as_any().downcast_ref::<EmulatedTexture>().ok_or_else(|| {
                    Error::InvalidResource(format!("Texture was not created by the {} device", P::NAME))
                })?;
                if native.generation != self.generation {
                    return Err(Error::InvalidResource(format!(
                        "Texture {} predates the last device reset", native.id
                    )));
                }
                Some(native.id)
            }
            None => None,
        };
        self.bound.state.textures[stage] = id;
        self.record_call(NativeCall::SetTexture { stage, texture: id });
        Ok(())
    }

    fn set_vertex_buffer(&mut self, stream: usize, buffer: Option<&Arc<dyn Buffer>>, stride: u32) -> Result<()> {
        if stream >= MAX_VERTEX_STREAMS {
            return Err(Error::InvalidResource(format!("Vertex stream {} out of range", stream)));
        }
        let id = match buffer {
            Some(buffer) => Some(self.resolve_buffer(buffer)?.id()),
            None => None,
        };
        self.bound.streams[stream] = buffer.map(|b| (Arc::clone(b), stride));
        self.record_call(NativeCall::SetVertexBuffer { stream, buffer: id, stride });
        Ok(())
    }

    fn set_index_buffer(&mut self, buffer: Option<&Arc<dyn Buffer>>, format: IndexFormat) -> Result<()> {
        let id = match buffer {
            Some(buffer) => Some(self.resolve_buffer(buffer)?.id()),
            None => None,
        };
        self.bound.index = buffer.map(|b| (Arc::clone(b), format));
        self.record_call(NativeCall::SetIndexBuffer { buffer: id, format });
        Ok(())
    }

    fn draw(&mut self, primitive: PrimitiveKind, start_vertex: u32, primitive_count: u32) -> Result<()> {
        self.record_call(NativeCall::Draw { primitive, start_vertex, primitive_count });
        if self.lost {
            return Ok(());
        }
        let (vertex_block, stride) = self.stream0()?;
        let count = primitive.element_count(primitive_count) as usize;
        let start = start_vertex as usize * stride as usize;
        let vertex_read = start..start + count * stride as usize;

        self.recording.push(Command::Draw(Box::new(QueuedDraw {
            frame: self.frame_index,
            primitive,
            primitive_count,
            vertex_block,
            stride,
            first_vertex: start_vertex as i64,
            vertex_read,
            index: None,
            index_read: 0..0,
            state: self.bound.state.clone(),
        })));
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        primitive: PrimitiveKind,
        base_vertex: i32,
        min_vertex: u32,
        vertex_count: u32,
        start_index: u32,
        primitive_count: u32,
    ) -> Result<()> {
        self.record_call(NativeCall::DrawIndexed { primitive, base_vertex, start_index, primitive_count });
        if self.lost {
            return Ok(());
        }
        let (vertex_block, stride) = self.stream0()?;
        let Some((index_buffer, format)) = &self.bound.index else {
            return Err(engine_err!("skirmish::EmulatedDevice", "Indexed draw issued with no index buffer"));
        };
        let format = *format;
        let index_block = self.resolve_buffer(index_buffer)?.current_block();

        let stride_bytes = stride as usize;
        let vertex_read = if vertex_count > 0 {
            let first = (base_vertex as i64 + min_vertex as i64).max(0) as usize;
            first * stride_bytes..(first + vertex_count as usize) * stride_bytes
        } else {
            0..vertex_block.len()
        };
        let count = primitive.element_count(primitive_count) as usize;
        let index_size = format.size_bytes() as usize;
        let index_start = start_index as usize * index_size;
        let index_read = index_start..index_start + count * index_size;

        self.recording.push(Command::Draw(Box::new(QueuedDraw {
            frame: self.frame_index,
            primitive,
            primitive_count,
            vertex_block,
            stride,
            first_vertex: base_vertex as i64,
            vertex_read,
            index: Some((index_block, format, start_index)),
            index_read,
            state: self.bound.state.clone(),
        })));
        Ok(())
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.record_call(NativeCall::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<FrameStatus> {
        self.record_call(NativeCall::EndFrame);
        if self.lost {
            self.recording.clear();
            return Ok(FrameStatus::DeviceLost);
        }
        self.submit();
        self.frame_index += 1;
        Ok(FrameStatus::Presented)
    }

    fn wait_idle(&mut self) -> Result<()> {
        if !self.recording.is_empty() {
            let commands = std::mem::take(&mut self.recording);
            self.in_flight.push_back(commands);
        }
        while let Some(commands) = self.in_flight.pop_front() {
            self.execute(commands);
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.generation += 1;
        self.lost = false;
        self.recording.clear();
        self.in_flight.clear();
        self.mapped.clear();
        self.bound = BoundState::default();
        self.record_call(NativeCall::Reset);
        engine_debug!("skirmish::EmulatedDevice", "{} device reset (generation {})", P::NAME, self.generation);
        Ok(())
    }

    fn is_lost(&self) -> bool {
        self.lost
    }

    fn stats(&self) -> GraphicsDeviceStats {
        GraphicsDeviceStats {
            memory_used: self.budget.used(),
            ..self.stats
        }
    }
}
