/// Vertex format of the ring-allocated vertex buffers
///
/// Position, normal, packed diffuse color and two texture coordinate sets,
/// tightly packed (44 bytes).

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DynamicVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// ARGB, 8 bits per channel
    pub diffuse: u32,
    pub uv0: [f32; 2],
    pub uv1: [f32; 2],
}

impl DynamicVertex {
    /// Size in bytes
    pub const STRIDE: u32 = std::mem::size_of::<DynamicVertex>() as u32;

    pub fn new(position: Vec3, normal: Vec3, diffuse: u32, uv0: Vec2) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            diffuse,
            uv0: uv0.to_array(),
            uv1: [0.0; 2],
        }
    }

    /// Unlit colored vertex facing +Z
    pub fn colored(position: Vec3, diffuse: u32) -> Self {
        Self::new(position, Vec3::Z, diffuse, Vec2::ZERO)
    }

    pub fn with_uv1(mut self, uv1: Vec2) -> Self {
        self.uv1 = uv1.to_array();
        self
    }
}

/// Pack an RGBA color (0..1 per channel) into ARGB
pub fn pack_argb(r: f32, g: f32, b: f32, a: f32) -> u32 {
    let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
    (channel(a) << 24) | (channel(r) << 16) | (channel(g) << 8) | channel(b)
}
