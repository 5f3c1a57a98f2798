//! Headless frame loop over both backends
//!
//! Every frame streams a ring of particles through the dynamic vertex ring,
//! draws a static ground quad and a sorted translucent batch through the CPU
//! sorting rings, then prints the frame statistics.

use skirmish_render::glam::{Mat4, Vec2, Vec3};
use skirmish_render::skirmish::device::{
    BlendMode, FrameStatus, IndexFormat, Light, MaterialDesc, PrimitiveKind, ShaderDesc,
    TextureDesc, TextureFormat, TransformSlot,
};
use skirmish_render::skirmish::dynamic::{pack_argb, DynamicVertex, LockMode};
use skirmish_render::skirmish::resource::{BufferHandle, BufferResourceDesc};
use skirmish_render::skirmish::{BackendKind, RenderConfig, RenderContext, Result};

const FRAMES: u32 = 4;
const PARTICLES: u32 = 1800;

/// Static ground quad, written once
fn ground(context: &mut RenderContext) -> Result<(BufferHandle, BufferHandle)> {
    let vertices = context.create_buffer(&BufferResourceDesc::vertex(4, DynamicVertex::STRIDE))?;
    let indices = context.create_buffer(&BufferResourceDesc::index(6, IndexFormat::U16))?;

    let corners = [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)];
    let quad: Vec<DynamicVertex> = corners
        .iter()
        .map(|&(x, z)| {
            let position = Vec3::new(x * 50.0, 0.0, z * 50.0);
            DynamicVertex::new(position, Vec3::Y, pack_argb(0.3, 0.6, 0.2, 1.0), Vec2::new(x, z))
        })
        .collect();

    let mut scope = context.lock(vertices, 0, 4, LockMode::Discard)?;
    scope.write(0, &quad)?;
    scope.release()?;
    let mut scope = context.lock(indices, 0, 6, LockMode::Discard)?;
    scope.write(0, &[0u16, 1, 2, 2, 1, 3])?;
    scope.release()?;
    Ok((vertices, indices))
}

fn particles(context: &mut RenderContext, frame: u32) -> Result<()> {
    let mut scope = context.acquire_vertices(PARTICLES)?;
    let phase = frame as f32 * 0.1;
    let points: Vec<DynamicVertex> = (0..PARTICLES)
        .map(|i| {
            let angle = i as f32 * 0.01 + phase;
            DynamicVertex::colored(Vec3::new(angle.cos() * 10.0, 2.0, angle.sin() * 10.0), pack_argb(1.0, 0.8, 0.2, 1.0))
        })
        .collect();
    scope.write(0, &points)?;
    let range = scope.release()?;

    context.set_world_identity();
    context.set_dynamic_vertex_buffer(&range)?;
    context.set_index_buffer(None, 0)?;
    context.draw(PrimitiveKind::PointList, 0, PARTICLES)
}

fn translucent_batch(context: &mut RenderContext, frame: u32) -> Result<()> {
    let mut scope = context.acquire_sorting_vertices(3)?;
    let lift = frame as f32;
    scope.write(
        0,
        &[
            DynamicVertex::colored(Vec3::new(0.0, lift, 0.0), pack_argb(0.2, 0.4, 1.0, 0.5)),
            DynamicVertex::colored(Vec3::new(1.0, lift, 0.0), pack_argb(0.2, 0.4, 1.0, 0.5)),
            DynamicVertex::colored(Vec3::new(0.0, lift, 1.0), pack_argb(0.2, 0.4, 1.0, 0.5)),
        ],
    )?;
    let vertices = scope.release()?;
    let mut scope = context.acquire_sorting_indices(3)?;
    scope.write(0, &[2u16, 1, 0])?;
    let indices = scope.release()?;

    context.set_shader(&ShaderDesc { blend: BlendMode::Alpha, depth_write: false, ..ShaderDesc::default() });
    context.set_dynamic_vertex_buffer(&vertices)?;
    context.set_dynamic_index_buffer(&indices, 0)?;
    context.draw(PrimitiveKind::TriangleList, 0, 1)
}

fn run(backend: BackendKind) -> Result<()> {
    let mut context = RenderContext::new(RenderConfig { backend, ..RenderConfig::default() })?;
    let (ground_vertices, ground_indices) = ground(&mut context)?;

    let sender = context.texture_sender();
    std::thread::spawn(move || {
        let desc = TextureDesc { width: 2, height: 2, format: TextureFormat::R8G8B8A8, pixels: vec![128; 16] };
        let _ = sender.send("grass", desc);
    })
    .join()
    .ok();

    let view = Mat4::look_at_rh(Vec3::new(0.0, 30.0, 40.0), Vec3::ZERO, Vec3::Y);
    context.set_transform(TransformSlot::View, &view);
    context.set_light(0, Some(&Light::directional(Vec3::new(-0.3, -1.0, -0.2))))?;
    context.set_material(Some(&MaterialDesc::default()));

    for frame in 0..FRAMES {
        context.begin_frame()?;
        for (name, texture) in context.process_texture_uploads()? {
            println!("  texture '{}' ready ({}x{})", name, texture.info().width, texture.info().height);
            context.set_texture(0, Some(&texture))?;
        }

        context.set_shader(&ShaderDesc::default());
        context.set_vertex_buffer(0, Some(ground_vertices))?;
        context.set_index_buffer(Some(ground_indices), 0)?;
        context.draw_range(PrimitiveKind::TriangleList, 0, 2, 0, 4)?;

        particles(&mut context, frame)?;
        translucent_batch(&mut context, frame)?;

        let status = context.end_frame()?;
        let stats = context.stats();
        println!(
            "  frame {}: {:?}, {} draws, {} primitives, {} state changes, {} skipped, {} locks, {} wraps",
            frame,
            status,
            stats.draw_calls,
            stats.primitives,
            stats.state_changes(),
            stats.redundant_skips,
            stats.locks,
            stats.ring_wraps
        );
        if status == FrameStatus::DeviceLost {
            context.recover_device()?;
        }
    }

    let device = context.device_stats()?;
    let pool = context.pool_stats();
    println!(
        "  device: {} native calls, {} renames, {} uploads, {} bytes written, {} bytes in use",
        device.native_calls, device.renames, device.uploads, device.bytes_written, device.memory_used
    );
    println!("  pool: {} buffers, {} bytes", pool.buffer_count, pool.total_bytes);

    context.release(ground_vertices)?;
    context.release(ground_indices)?;
    Ok(())
}

fn main() {
    for backend in [BackendKind::DirectMap, BackendKind::Staged] {
        println!("{:?} backend", backend);
        if let Err(e) = run(backend) {
            eprintln!("Render demo failed: {}", e);
            std::process::exit(1);
        }
    }
}
