use super::*;

struct FakeTexture {
    info: TextureInfo,
}

impl Texture for FakeTexture {
    fn info(&self) -> &TextureInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn fake_texture() -> TextureRef {
    TextureRef::new(Arc::new(FakeTexture {
        info: TextureInfo { width: 4, height: 4, format: TextureFormat::R8G8B8A8 },
    }))
}

#[test]
fn test_element_count_per_topology() {
    assert_eq!(PrimitiveKind::PointList.element_count(5), 5);
    assert_eq!(PrimitiveKind::LineList.element_count(5), 10);
    assert_eq!(PrimitiveKind::LineStrip.element_count(5), 6);
    assert_eq!(PrimitiveKind::TriangleList.element_count(2), 6);
    assert_eq!(PrimitiveKind::TriangleStrip.element_count(2), 4);
    assert_eq!(PrimitiveKind::TriangleFan.element_count(3), 5);
}

#[test]
fn test_element_count_zero_primitives() {
    assert_eq!(PrimitiveKind::TriangleStrip.element_count(0), 0);
    assert_eq!(PrimitiveKind::LineStrip.element_count(0), 0);
}

#[test]
fn test_texture_ref_equality_is_identity() {
    let a = fake_texture();
    let b = fake_texture();
    assert_eq!(a, a.clone());
    assert_ne!(a, b);
    assert_eq!(a.info(), b.info());
}

#[test]
fn test_shader_and_material_value_equality() {
    let opaque = ShaderDesc::default();
    let alpha = ShaderDesc { blend: BlendMode::Alpha, depth_write: false, ..ShaderDesc::default() };
    assert_eq!(opaque, ShaderDesc::default());
    assert_ne!(opaque, alpha);

    let tinted = MaterialDesc { diffuse: Vec4::new(1.0, 0.0, 0.0, 1.0), ..MaterialDesc::default() };
    assert_ne!(tinted, MaterialDesc::default());
}

#[test]
fn test_texture_format_sizes() {
    assert_eq!(TextureFormat::R8G8B8A8.bytes_per_pixel(), 4);
    assert_eq!(TextureFormat::R5G6B5.bytes_per_pixel(), 2);
    assert_eq!(TextureFormat::A8.bytes_per_pixel(), 1);
}
