//! Integration tests for RenderContext
//!
//! Drive whole frames through both emulated backends and check what the
//! device actually fetched when each draw executed. No GPU required.
//!
//! Run with: cargo test --test render_context_integration_tests

use std::sync::{Arc, Mutex};

use skirmish_render::glam::{Mat4, Vec3};
use skirmish_render::skirmish::device::{
    DirectMap, DrawRecord, EmulatedDevice, FrameStatus, GraphicsDevice, NativeCall,
    PrimitiveKind, ShaderDesc, Staged, TextureDesc, TextureFormat, TransformSlot, WritePath,
};
use skirmish_render::skirmish::dynamic::{pack_argb, DynamicVertex, LockMode};
use skirmish_render::skirmish::{BackendKind, Error, RenderConfig, RenderContext};

// ============================================================================
// HELPERS
// ============================================================================

fn config(vertex_ring_capacity: u32, frame_latency: usize) -> RenderConfig {
    RenderConfig {
        vertex_ring_capacity,
        sorting_ring_capacity: vertex_ring_capacity,
        frame_latency,
        enable_validation: true,
        ..RenderConfig::default()
    }
}

fn context_on<P: WritePath>(config: RenderConfig) -> (Arc<Mutex<EmulatedDevice<P>>>, RenderContext) {
    let device = Arc::new(Mutex::new(EmulatedDevice::<P>::new(config.device_config())));
    let shared: Arc<Mutex<dyn GraphicsDevice>> = device.clone();
    (device, RenderContext::with_device(config, shared).unwrap())
}

fn strip(first: f32, count: u32) -> Vec<DynamicVertex> {
    (0..count)
        .map(|i| DynamicVertex::colored(Vec3::new(first + i as f32, 0.0, 0.0), pack_argb(1.0, 1.0, 1.0, 1.0)))
        .collect()
}

fn xs(record: &DrawRecord) -> Vec<f32> {
    record.vertices_as::<DynamicVertex>().iter().map(|v| v.position[0]).collect()
}

/// Ring-allocate `count` vertices starting at `first`, bind them and draw them as points
fn draw_points(context: &mut RenderContext, first: f32, count: u32) -> (u32, LockMode) {
    let mut scope = context.acquire_vertices(count).unwrap();
    scope.write(0, &strip(first, count)).unwrap();
    let range = scope.release().unwrap();
    context.set_dynamic_vertex_buffer(&range).unwrap();
    context.draw(PrimitiveKind::PointList, 0, count).unwrap();
    (range.start, range.mode)
}

/// Same through the CPU sorting ring
fn draw_sorting_points(context: &mut RenderContext, first: f32, count: u32) -> (u32, LockMode) {
    let mut scope = context.acquire_sorting_vertices(count).unwrap();
    scope.write(0, &strip(first, count)).unwrap();
    let range = scope.release().unwrap();
    context.set_dynamic_vertex_buffer(&range).unwrap();
    context.draw(PrimitiveKind::PointList, 0, count).unwrap();
    (range.start, range.mode)
}

// ============================================================================
// CORRUPTION TESTS
// ============================================================================

fn frames_never_corrupt_queued_draws<P: WritePath>() {
    let (device, mut context) = context_on::<P>(config(6, 1));

    context.begin_frame().unwrap();
    draw_points(&mut context, 0.0, 3);
    draw_points(&mut context, 10.0, 3);
    assert_eq!(context.end_frame().unwrap(), FrameStatus::Presented);
    assert!(device.lock().unwrap().executed_draws().is_empty());

    // Wraps onto the memory the first frame's draws have not read yet
    context.begin_frame().unwrap();
    assert_eq!(draw_points(&mut context, 20.0, 3), (0, LockMode::Discard));
    assert_eq!(draw_points(&mut context, 30.0, 3), (3, LockMode::Append));
    context.end_frame().unwrap();
    context.end_frame().unwrap();

    let device = device.lock().unwrap();
    let fetched: Vec<Vec<f32>> = device.executed_draws().iter().map(xs).collect();
    assert_eq!(
        fetched,
        vec![
            vec![0.0, 1.0, 2.0],
            vec![10.0, 11.0, 12.0],
            vec![20.0, 21.0, 22.0],
            vec![30.0, 31.0, 32.0],
        ]
    );
    assert_eq!(device.stats().write_hazards, 0);
}

#[test]
fn test_direct_map_frames_never_corrupt_queued_draws() {
    frames_never_corrupt_queued_draws::<DirectMap>();
}

#[test]
fn test_staged_frames_never_corrupt_queued_draws() {
    frames_never_corrupt_queued_draws::<Staged>();
}

#[test]
fn test_direct_map_discard_renames_memory_in_flight() {
    let (device, mut context) = context_on::<DirectMap>(config(6, 1));
    draw_points(&mut context, 0.0, 6);
    context.end_frame().unwrap();
    let renames = device.lock().unwrap().stats().renames;

    draw_points(&mut context, 10.0, 6);
    assert_eq!(device.lock().unwrap().stats().renames, renames + 1);
}

// ============================================================================
// RING RESIZE TESTS
// ============================================================================

fn resize_mid_frame_keeps_lazy_wrap<P: WritePath>(sorting: bool) {
    let (device, mut context) = context_on::<P>(config(6, 1));
    let draw: fn(&mut RenderContext, f32, u32) -> (u32, LockMode) =
        if sorting { draw_sorting_points } else { draw_points };

    context.begin_frame().unwrap();
    assert_eq!(draw(&mut context, 0.0, 4), (0, LockMode::Discard));
    // Larger than the ring: replaced mid-frame by an 8-element resource
    assert_eq!(draw(&mut context, 10.0, 8), (0, LockMode::Discard));
    context.end_frame().unwrap();

    // The offset survives the frame boundary and wraps lazily
    context.begin_frame().unwrap();
    assert_eq!(draw(&mut context, 20.0, 3), (0, LockMode::Discard));
    assert_eq!(draw(&mut context, 30.0, 3), (3, LockMode::Append));
    assert_eq!(draw(&mut context, 40.0, 2), (6, LockMode::Append));
    context.end_frame().unwrap();
    context.end_frame().unwrap();

    let device = device.lock().unwrap();
    let fetched: Vec<Vec<f32>> = device.executed_draws().iter().map(xs).collect();
    let expected: Vec<Vec<f32>> = [(0.0, 4), (10.0, 8), (20.0, 3), (30.0, 3), (40.0, 2)]
        .iter()
        .map(|&(first, count)| (0..count).map(|i| first + i as f32).collect())
        .collect();
    assert_eq!(fetched, expected);
    assert!(device.executed_draws().iter().all(|d| !d.out_of_range));
}

#[test]
fn test_direct_map_device_ring_resize_mid_frame() {
    resize_mid_frame_keeps_lazy_wrap::<DirectMap>(false);
}

#[test]
fn test_staged_device_ring_resize_mid_frame() {
    resize_mid_frame_keeps_lazy_wrap::<Staged>(false);
}

#[test]
fn test_direct_map_sorting_ring_resize_mid_frame() {
    resize_mid_frame_keeps_lazy_wrap::<DirectMap>(true);
}

#[test]
fn test_staged_sorting_ring_resize_mid_frame() {
    resize_mid_frame_keeps_lazy_wrap::<Staged>(true);
}

#[test]
fn test_resize_counts_in_frame_stats() {
    let mut context = RenderContext::new(config(6, 0)).unwrap();
    context.acquire_vertices(4).unwrap().release().unwrap();
    context.acquire_vertices(8).unwrap().release().unwrap();
    assert_eq!(context.stats().ring_resizes, 1);
}

// ============================================================================
// STATE CACHE TESTS
// ============================================================================

#[test]
fn test_same_world_transform_twice_sets_once() {
    let (device, mut context) = context_on::<DirectMap>(config(64, 0));
    draw_points(&mut context, 0.0, 3);
    device.lock().unwrap().take_calls();

    let m1 = Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0));
    context.set_transform(TransformSlot::World, &m1);
    context.set_transform(TransformSlot::World, &m1);
    context.draw(PrimitiveKind::PointList, 0, 3).unwrap();

    let calls = device.lock().unwrap().take_calls();
    let world_sets = calls
        .iter()
        .filter(|c| **c == NativeCall::SetTransform(TransformSlot::World))
        .count();
    assert_eq!(world_sets, 1);
}

#[test]
fn test_flush_order_ignores_setter_order() {
    let (device, mut context) = context_on::<Staged>(config(64, 0));
    draw_points(&mut context, 0.0, 3);
    device.lock().unwrap().take_calls();

    // Set in reverse order
    let range = context.acquire_vertices(3).unwrap().release().unwrap();
    context.set_dynamic_vertex_buffer(&range).unwrap();
    let texture = context
        .create_texture(&TextureDesc { width: 1, height: 1, format: TextureFormat::A8, pixels: vec![0] })
        .unwrap();
    context.set_texture(0, Some(&texture)).unwrap();
    context.set_shader(&ShaderDesc { fog: true, ..ShaderDesc::default() });
    context.set_material(Some(&Default::default()));
    context.set_transform(TransformSlot::View, &Mat4::from_scale(Vec3::splat(2.0)));
    device.lock().unwrap().take_calls();
    context.draw(PrimitiveKind::PointList, 0, 3).unwrap();

    let calls = device.lock().unwrap().take_calls();
    let kinds: Vec<&str> = calls
        .iter()
        .map(|c| match c {
            NativeCall::SetTransform(_) => "transform",
            NativeCall::SetMaterial { .. } => "material",
            NativeCall::SetShader => "shader",
            NativeCall::SetTexture { .. } => "texture",
            NativeCall::SetVertexBuffer { .. } => "buffer",
            NativeCall::Draw { .. } => "draw",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["transform", "material", "shader", "texture", "draw"]);
    assert!(context.cache().dirty().is_empty());
}

// ============================================================================
// LOCKING TESTS
// ============================================================================

#[test]
fn test_second_scope_before_release_is_concurrent_lock() {
    let mut context = RenderContext::new(config(64, 0)).unwrap();
    let _outstanding = context.acquire_vertices(3).unwrap();
    assert!(matches!(context.acquire_vertices(3), Err(Error::ConcurrentLock(_))));
}

#[test]
fn test_capacity_1000_scenario_on_both_backends() {
    for backend in [BackendKind::DirectMap, BackendKind::Staged] {
        let mut context = RenderContext::new(RenderConfig { backend, ..config(1000, 0) }).unwrap();
        let observed: Vec<(u32, LockMode)> = (0..3)
            .map(|_| {
                let range = context.acquire_vertices(400).unwrap().release().unwrap();
                (range.start, range.mode)
            })
            .collect();
        assert_eq!(
            observed,
            vec![(0, LockMode::Discard), (400, LockMode::Append), (0, LockMode::Discard)]
        );
    }
}

// ============================================================================
// DEVICE LOSS TESTS
// ============================================================================

fn recovery_preserves_semantic_state<P: WritePath>() {
    let (device, mut context) = context_on::<P>(config(64, 1));
    let world = Mat4::from_translation(Vec3::new(0.0, 7.0, 0.0));
    context.set_transform(TransformSlot::World, &world);
    draw_points(&mut context, 0.0, 3);
    context.end_frame().unwrap();

    device.lock().unwrap().simulate_device_loss();
    assert_eq!(context.end_frame().unwrap(), FrameStatus::DeviceLost);
    context.recover_device().unwrap();

    context.begin_frame().unwrap();
    draw_points(&mut context, 50.0, 3);
    context.end_frame().unwrap();
    context.end_frame().unwrap();

    let device = device.lock().unwrap();
    let last = device.executed_draws().last().unwrap();
    assert_eq!(xs(last), vec![50.0, 51.0, 52.0]);
    assert_eq!(last.state.world, world);
}

#[test]
fn test_direct_map_recovery_preserves_state() {
    recovery_preserves_semantic_state::<DirectMap>();
}

#[test]
fn test_staged_recovery_preserves_state() {
    recovery_preserves_semantic_state::<Staged>();
}
