/// Fixed-function render state value types
///
/// Every type here is a plain value compared by equality, so the state cache
/// can decide whether a setter actually changes anything.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use glam::{Vec3, Vec4};

/// Number of texture stages the cache tracks
pub const MAX_TEXTURE_STAGES: usize = 8;
/// Number of light slots the cache tracks
pub const MAX_LIGHTS: usize = 4;
/// Number of vertex streams the cache tracks
pub const MAX_VERTEX_STREAMS: usize = 2;

/// Transform slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformSlot {
    /// Object to world
    World,
    /// World to camera
    View,
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

impl PrimitiveKind {
    /// Number of vertices (or indices) consumed by `primitive_count` primitives
    pub fn element_count(&self, primitive_count: u32) -> u32 {
        if primitive_count == 0 {
            return 0;
        }
        match self {
            PrimitiveKind::PointList => primitive_count,
            PrimitiveKind::LineList => primitive_count * 2,
            PrimitiveKind::LineStrip => primitive_count + 1,
            PrimitiveKind::TriangleList => primitive_count * 3,
            PrimitiveKind::TriangleStrip | PrimitiveKind::TriangleFan => primitive_count + 2,
        }
    }
}

/// Light type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Directional { direction: Vec3 },
    Point { position: Vec3, range: f32 },
    Spot { position: Vec3, direction: Vec3, range: f32, inner_cone: f32, outer_cone: f32 },
}

/// Fixed-function light
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub diffuse: Vec4,
    pub specular: Vec4,
    pub ambient: Vec4,
}

impl Light {
    /// White directional light pointing along `direction`
    pub fn directional(direction: Vec3) -> Self {
        Self {
            kind: LightKind::Directional { direction },
            diffuse: Vec4::ONE,
            specular: Vec4::ZERO,
            ambient: Vec4::ZERO,
        }
    }
}

/// Material lighting properties
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialDesc {
    pub diffuse: Vec4,
    pub ambient: Vec4,
    pub specular: Vec4,
    pub emissive: Vec4,
    pub power: f32,
    /// Take diffuse color from the vertex instead of the material
    pub use_vertex_color: bool,
}

impl Default for MaterialDesc {
    fn default() -> Self {
        Self {
            diffuse: Vec4::ONE,
            ambient: Vec4::ONE,
            specular: Vec4::ZERO,
            emissive: Vec4::ZERO,
            power: 1.0,
            use_vertex_color: false,
        }
    }
}

/// Depth comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthCompare {
    Never,
    Less,
    LessEqual,
    Equal,
    Always,
}

/// Framebuffer blend mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Opaque,
    Alpha,
    Additive,
    Multiplicative,
}

/// Fixed-function shader settings
///
/// Describes how the pipeline combines textures, lighting and the framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderDesc {
    pub depth_compare: DepthCompare,
    pub depth_write: bool,
    pub blend: BlendMode,
    pub alpha_test: bool,
    pub cull_back_faces: bool,
    pub lighting: bool,
    pub fog: bool,
}

impl Default for ShaderDesc {
    fn default() -> Self {
        Self {
            depth_compare: DepthCompare::LessEqual,
            depth_write: true,
            blend: BlendMode::Opaque,
            alpha_test: false,
            cull_back_faces: true,
            lighting: false,
            fog: false,
        }
    }
}

/// Texture pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8G8B8A8,
    B8G8R8A8,
    R5G6B5,
    A8,
}

impl TextureFormat {
    /// Bytes per pixel
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8G8B8A8 | TextureFormat::B8G8R8A8 => 4,
            TextureFormat::R5G6B5 => 2,
            TextureFormat::A8 => 1,
        }
    }
}

/// Descriptor for creating a texture from already decoded pixels
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Top mip level, tightly packed
    pub pixels: Vec<u8>,
}

/// Texture properties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// Native texture trait
pub trait Texture: Send + Sync {
    /// Get texture properties
    fn info(&self) -> &TextureInfo;

    /// Backend downcast hook
    fn as_any(&self) -> &dyn Any;
}

/// Shared texture reference compared by identity
///
/// Two references are equal when they point to the same native texture.
#[derive(Clone)]
pub struct TextureRef(Arc<dyn Texture>);

impl TextureRef {
    pub fn new(texture: Arc<dyn Texture>) -> Self {
        Self(texture)
    }

    /// Native texture
    pub fn texture(&self) -> &Arc<dyn Texture> {
        &self.0
    }

    pub fn info(&self) -> &TextureInfo {
        self.0.info()
    }
}

impl PartialEq for TextureRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TextureRef {}

impl fmt::Debug for TextureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TextureRef").field(self.0.info()).finish()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
