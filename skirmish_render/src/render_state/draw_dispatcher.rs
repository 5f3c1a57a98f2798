/// Draw Dispatcher - flushes dirty state and issues the native draw
///
/// Start indices are relative to the bound ranges: the dispatcher adds the
/// ring offsets recorded at bind time before talking to the device.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::graphics_device::{lock_device, GraphicsDevice, PrimitiveKind};
use crate::render_state::render_state_cache::BufferBindings;
use crate::render_state::{RenderStateCache, RenderStats};
use crate::resource::BufferPool;
use crate::{engine_debug, engine_warn};

/// One draw request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub primitive: PrimitiveKind,
    /// First vertex (non-indexed) or first index (indexed), relative to the binding
    pub start: u32,
    pub primitive_count: u32,
    /// `(min_vertex, vertex_count)` referenced by an indexed draw, when known
    pub vertex_range: Option<(u32, u32)>,
}

impl DrawCall {
    pub fn new(primitive: PrimitiveKind, start: u32, primitive_count: u32) -> Self {
        Self { primitive, start, primitive_count, vertex_range: None }
    }

    /// Declare the vertex range an indexed draw references
    pub fn with_vertex_range(mut self, min_vertex: u32, vertex_count: u32) -> Self {
        self.vertex_range = Some((min_vertex, vertex_count));
        self
    }
}

/// Owns the render state cache and the per-frame statistics
pub struct DrawDispatcher {
    cache: RenderStateCache,
    stats: RenderStats,
}

impl Default for DrawDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawDispatcher {
    pub fn new() -> Self {
        Self {
            cache: RenderStateCache::new(),
            stats: RenderStats::default(),
        }
    }

    pub fn cache(&self) -> &RenderStateCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut RenderStateCache {
        &mut self.cache
    }

    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut RenderStats {
        &mut self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = RenderStats::default();
    }

    /// Flush pending state and draw with the pending buffer bindings
    ///
    /// # Arguments
    ///
    /// * `pool` - Pool owning the bound buffers
    /// * `graphics_device` - Device to draw on
    /// * `call` - Primitive type, relative start and primitive count
    ///
    /// # Returns
    ///
    /// `MissingVertexBuffer` when stream 0 is unbound. A lost device swallows
    /// the draw and returns `Ok`.
    pub fn draw(&mut self, pool: &BufferPool, graphics_device: &Arc<Mutex<dyn GraphicsDevice>>, call: &DrawCall) -> Result<()> {
        self.dispatch(pool, graphics_device, call, None)
    }

    /// Draw with `bindings` in place of the pending buffers
    pub(crate) fn draw_with_bindings(
        &mut self,
        pool: &BufferPool,
        graphics_device: &Arc<Mutex<dyn GraphicsDevice>>,
        call: &DrawCall,
        bindings: &BufferBindings,
    ) -> Result<()> {
        self.dispatch(pool, graphics_device, call, Some(bindings))
    }

    fn dispatch(
        &mut self,
        pool: &BufferPool,
        graphics_device: &Arc<Mutex<dyn GraphicsDevice>>,
        call: &DrawCall,
        substitute: Option<&BufferBindings>,
    ) -> Result<()> {
        let pending = self.cache.pending();
        let (vertex, index) = match substitute {
            Some(bindings) => (bindings.vertex[0], bindings.index),
            None => (pending.vertex_buffers[0], pending.index_buffer),
        };
        let Some(vertex) = vertex else {
            engine_warn!("skirmish::DrawDispatcher", "Draw of {:?} with no vertex buffer on stream 0", call.primitive);
            return Err(Error::MissingVertexBuffer);
        };
        if call.primitive_count == 0 {
            return Ok(());
        }

        let mut device = lock_device(graphics_device)?;
        if device.is_lost() {
            engine_debug!("skirmish::DrawDispatcher", "Device lost, draw skipped");
            return Ok(());
        }
        self.cache.flush_with(pool, &mut *device, &mut self.stats, substitute)?;

        match index {
            Some(index) => {
                let (min_vertex, vertex_count) = call.vertex_range.unwrap_or((0, 0));
                device.draw_indexed(
                    call.primitive,
                    vertex.base_vertex as i32 + index.base_offset,
                    min_vertex,
                    vertex_count,
                    index.start_index + call.start,
                    call.primitive_count,
                )?;
            }
            None => {
                device.draw(call.primitive, vertex.base_vertex + call.start, call.primitive_count)?;
            }
        }

        self.stats.draw_calls += 1;
        self.stats.primitives += call.primitive_count;
        Ok(())
    }
}

#[cfg(test)]
#[path = "draw_dispatcher_tests.rs"]
mod tests;
