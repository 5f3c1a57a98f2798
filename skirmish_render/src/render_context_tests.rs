use super::*;
use glam::{Vec2, Vec3};

use crate::dynamic::DynamicVertex;
use crate::graphics_device::{EmulatedDeviceConfig, NativeCall, TextureFormat};

fn config(backend: BackendKind) -> RenderConfig {
    RenderConfig {
        backend,
        frame_latency: 0,
        enable_validation: true,
        ..RenderConfig::default()
    }
}

fn direct_context(config: RenderConfig) -> (Arc<Mutex<DirectMapDevice>>, RenderContext) {
    let device = Arc::new(Mutex::new(DirectMapDevice::new(config.device_config())));
    let shared: Arc<Mutex<dyn GraphicsDevice>> = device.clone();
    (device, RenderContext::with_device(config, shared).unwrap())
}

fn vertex(x: f32) -> DynamicVertex {
    DynamicVertex::new(Vec3::new(x, 0.0, 0.0), Vec3::Z, 0xFFFF_FFFF, Vec2::ZERO)
}

fn triangle(base: f32) -> [DynamicVertex; 3] {
    [vertex(base), vertex(base + 1.0), vertex(base + 2.0)]
}

fn xs(record: &crate::graphics_device::DrawRecord) -> Vec<f32> {
    record.vertices_as::<DynamicVertex>().iter().map(|v| v.position[0]).collect()
}

#[test]
fn test_invalid_config_is_rejected() {
    let bad = RenderConfig { vertex_ring_capacity: 0, ..RenderConfig::default() };
    assert!(matches!(RenderContext::new(bad), Err(Error::InitializationFailed(_))));
}

#[test]
fn test_new_selects_backend() {
    let context = RenderContext::new(config(BackendKind::Staged)).unwrap();
    assert_eq!(
        context.graphics_device().lock().unwrap().write_model(),
        crate::graphics_device::WriteModel::Staged
    );
}

#[test]
fn test_vertex_ring_scenario() {
    let mut context = RenderContext::new(RenderConfig {
        vertex_ring_capacity: 1000,
        ..config(BackendKind::DirectMap)
    })
    .unwrap();

    let mut observed = Vec::new();
    for _ in 0..3 {
        let range = context.acquire_vertices(400).unwrap().release().unwrap();
        observed.push((range.start, range.mode));
    }
    assert_eq!(
        observed,
        vec![(0, LockMode::Discard), (400, LockMode::Append), (0, LockMode::Discard)]
    );
    assert_eq!(context.stats().ring_wraps, 1);
    assert_eq!(context.stats().locks, 3);
}

#[test]
fn test_dynamic_draw_on_both_backends() {
    for backend in [BackendKind::DirectMap, BackendKind::Staged] {
        let mut context = RenderContext::new(config(backend)).unwrap();
        context.begin_frame().unwrap();

        let mut scope = context.acquire_vertices(3).unwrap();
        scope.write(0, &triangle(1.0)).unwrap();
        let range = scope.release().unwrap();
        context.set_dynamic_vertex_buffer(&range).unwrap();
        context.draw(PrimitiveKind::TriangleList, 0, 1).unwrap();
        assert_eq!(context.end_frame().unwrap(), FrameStatus::Presented);

        let stats = context.stats();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.primitives, 1);
        assert_eq!(stats.locks, 1);
    }
}

#[test]
fn test_draw_without_vertex_buffer_fails() {
    let mut context = RenderContext::new(config(BackendKind::DirectMap)).unwrap();
    assert_eq!(
        context.draw(PrimitiveKind::TriangleList, 0, 1),
        Err(Error::MissingVertexBuffer)
    );
}

#[test]
fn test_draw_range_with_static_buffers() {
    let (device, mut context) = direct_context(config(BackendKind::DirectMap));
    let vertices = context
        .create_buffer(&BufferResourceDesc::vertex(6, DynamicVertex::STRIDE))
        .unwrap();
    let indices = context.create_buffer(&BufferResourceDesc::index(3, IndexFormat::U16)).unwrap();

    let mut scope = context.lock(vertices, 0, 6, LockMode::Discard).unwrap();
    scope.write(0, &triangle(0.0)).unwrap();
    scope.write(3, &triangle(10.0)).unwrap();
    scope.release().unwrap();
    let mut scope = context.lock(indices, 0, 3, LockMode::Discard).unwrap();
    scope.write(0, &[2u16, 1, 0]).unwrap();
    scope.release().unwrap();

    context.set_vertex_buffer(0, Some(vertices)).unwrap();
    context.set_index_buffer(Some(indices), 3).unwrap();
    context.draw_range(PrimitiveKind::TriangleList, 0, 1, 0, 3).unwrap();
    context.end_frame().unwrap();

    let device = device.lock().unwrap();
    assert_eq!(xs(&device.executed_draws()[0]), vec![12.0, 11.0, 10.0]);
}

#[test]
fn test_bound_static_buffer_cannot_be_locked() {
    let mut context = RenderContext::new(config(BackendKind::DirectMap)).unwrap();
    let handle = context
        .create_buffer(&BufferResourceDesc::vertex(3, DynamicVertex::STRIDE))
        .unwrap();
    context.set_vertex_buffer(0, Some(handle)).unwrap();

    assert!(matches!(
        context.lock(handle, 0, 3, LockMode::Discard),
        Err(Error::ResourceInUse(_))
    ));
    context.set_vertex_buffer(0, None).unwrap();
    assert!(context.lock(handle, 0, 3, LockMode::Discard).is_ok());
}

#[test]
fn test_append_over_queued_static_vertices_is_refused() {
    let (device, mut context) = direct_context(RenderConfig { frame_latency: 1, ..config(BackendKind::DirectMap) });
    let handle = context
        .create_buffer(&BufferResourceDesc::vertex(6, DynamicVertex::STRIDE))
        .unwrap();
    let mut scope = context.lock(handle, 0, 6, LockMode::Discard).unwrap();
    scope.write(0, &[triangle(0.0), triangle(3.0)].concat()).unwrap();
    scope.release().unwrap();

    context.set_vertex_buffer(0, Some(handle)).unwrap();
    context.draw(PrimitiveKind::PointList, 0, 4).unwrap();
    context.set_vertex_buffer(0, None).unwrap();

    assert!(matches!(
        context.lock(handle, 2, 2, LockMode::Append),
        Err(Error::InvalidLockMode(_))
    ));
    assert!(!context.pool().get(handle).unwrap().is_locked());
    // Past everything the queued draw reads
    assert!(context.lock(handle, 4, 2, LockMode::Append).is_ok());

    context.end_frame().unwrap();
    context.end_frame().unwrap();
    assert_eq!(xs(&device.lock().unwrap().executed_draws()[0]), vec![0.0, 1.0, 2.0, 3.0]);
}

#[test]
fn test_sorting_draw_copies_into_device_rings() {
    for backend in [BackendKind::DirectMap, BackendKind::Staged] {
        let device_config = config(backend).device_config();
        let shared: Arc<Mutex<dyn GraphicsDevice>> = match backend {
            BackendKind::DirectMap => Arc::new(Mutex::new(DirectMapDevice::new(device_config))),
            BackendKind::Staged => Arc::new(Mutex::new(StagedDevice::new(device_config))),
        };
        let mut context = RenderContext::with_device(config(backend), shared).unwrap();

        // Two batches in the sorting rings, the second one at a non-zero offset
        for batch in 0..2 {
            let base = batch as f32 * 100.0;
            let mut scope = context.acquire_sorting_vertices(4).unwrap();
            scope.write(0, &[vertex(base), vertex(base + 1.0), vertex(base + 2.0), vertex(base + 3.0)]).unwrap();
            let vertices = scope.release().unwrap();
            let mut scope = context.acquire_sorting_indices(6).unwrap();
            scope.write(0, &[0u16, 1, 2, 2, 1, 3]).unwrap();
            let indices = scope.release().unwrap();

            context.set_dynamic_vertex_buffer(&vertices).unwrap();
            context.set_dynamic_index_buffer(&indices, 0).unwrap();
            context.draw(PrimitiveKind::TriangleList, 0, 2).unwrap();
        }
        context.end_frame().unwrap();
        assert_eq!(context.stats().sorting_draws, 2);
        assert_eq!(context.device_stats().unwrap().draws_executed, 2);
    }
}

#[test]
fn test_sorting_draw_fetches_copied_geometry() {
    let (device, mut context) = direct_context(config(BackendKind::DirectMap));

    let mut scope = context.acquire_sorting_vertices(4).unwrap();
    scope.write(0, &[vertex(0.0), vertex(1.0), vertex(2.0), vertex(3.0)]).unwrap();
    let vertices = scope.release().unwrap();
    let mut scope = context.acquire_sorting_indices(6).unwrap();
    scope.write(0, &[3u16, 1, 2, 2, 1, 3]).unwrap();
    let indices = scope.release().unwrap();

    context.set_dynamic_vertex_buffer(&vertices).unwrap();
    context.set_dynamic_index_buffer(&indices, 0).unwrap();
    context.draw(PrimitiveKind::TriangleList, 0, 2).unwrap();
    context.end_frame().unwrap();

    let device = device.lock().unwrap();
    let record = &device.executed_draws()[0];
    assert!(!record.out_of_range);
    assert_eq!(xs(record), vec![3.0, 1.0, 2.0, 2.0, 1.0, 3.0]);
}

#[test]
fn test_sorting_vertices_without_indices() {
    let (device, mut context) = direct_context(config(BackendKind::DirectMap));

    let mut scope = context.acquire_sorting_vertices(6).unwrap();
    scope.write(0, &triangle(0.0)).unwrap();
    scope.write(3, &triangle(20.0)).unwrap();
    let vertices = scope.release().unwrap();

    context.set_dynamic_vertex_buffer(&vertices).unwrap();
    context.draw(PrimitiveKind::TriangleList, 3, 1).unwrap();
    context.end_frame().unwrap();

    let device = device.lock().unwrap();
    assert_eq!(xs(&device.executed_draws()[0]), vec![20.0, 21.0, 22.0]);
}

#[test]
fn test_same_texture_twice_adds_no_backend_calls() {
    let (device, mut context) = direct_context(config(BackendKind::DirectMap));
    let texture = context
        .create_texture(&TextureDesc { width: 1, height: 1, format: TextureFormat::A8, pixels: vec![7] })
        .unwrap();

    let mut scope = context.acquire_vertices(3).unwrap();
    scope.write(0, &triangle(0.0)).unwrap();
    let range = scope.release().unwrap();
    context.set_dynamic_vertex_buffer(&range).unwrap();
    context.set_texture(0, Some(&texture)).unwrap();
    context.draw(PrimitiveKind::TriangleList, 0, 1).unwrap();

    device.lock().unwrap().take_calls();
    context.set_texture(0, Some(&texture)).unwrap();
    context.set_texture(0, Some(&texture)).unwrap();
    context.draw(PrimitiveKind::TriangleList, 0, 1).unwrap();

    let calls = device.lock().unwrap().take_calls();
    assert_eq!(
        calls,
        vec![NativeCall::Draw { primitive: PrimitiveKind::TriangleList, start_vertex: 0, primitive_count: 1 }]
    );
}

#[test]
fn test_device_loss_and_recovery() {
    let (device, mut context) = direct_context(config(BackendKind::DirectMap));
    let handle = context
        .create_buffer(&BufferResourceDesc::vertex(3, DynamicVertex::STRIDE))
        .unwrap();
    let mut scope = context.lock(handle, 0, 3, LockMode::Discard).unwrap();
    scope.write(0, &triangle(5.0)).unwrap();
    scope.release().unwrap();
    context.set_vertex_buffer(0, Some(handle)).unwrap();
    context.acquire_vertices(3).unwrap().release().unwrap();

    device.lock().unwrap().simulate_device_loss();
    assert!(context.is_device_lost().unwrap());
    assert_eq!(context.acquire_vertices(3).err(), Some(Error::DeviceLost));
    assert!(context.draw(PrimitiveKind::TriangleList, 0, 1).is_ok());
    assert_eq!(context.end_frame().unwrap(), FrameStatus::DeviceLost);

    // Static buffer and both rings that own storage come back
    let restored = context.recover_device().unwrap();
    assert_eq!(restored, 2);
    assert!(!context.is_device_lost().unwrap());

    context.begin_frame().unwrap();
    context.draw(PrimitiveKind::TriangleList, 0, 1).unwrap();
    assert_eq!(context.end_frame().unwrap(), FrameStatus::Presented);

    let last = device.lock().unwrap().executed_draws().last().cloned().unwrap();
    assert_eq!(xs(&last), vec![5.0, 6.0, 7.0]);

    let range = context.acquire_vertices(3).unwrap().release().unwrap();
    assert_eq!((range.start, range.mode), (0, LockMode::Discard));
}

#[test]
fn test_snapshot_and_restore_state() {
    let mut context = RenderContext::new(config(BackendKind::DirectMap)).unwrap();
    let a = context.create_buffer(&BufferResourceDesc::vertex(3, DynamicVertex::STRIDE)).unwrap();
    context.set_vertex_buffer(0, Some(a)).unwrap();
    context.set_transform(TransformSlot::World, &Mat4::from_translation(Vec3::X));
    let saved = context.snapshot_state();

    context.set_vertex_buffer(0, None).unwrap();
    context.set_world_identity();
    assert_eq!(context.pool().get(a).unwrap().engine_refs(), 0);

    context.restore_state(&saved).unwrap();
    assert_eq!(context.snapshot_state(), saved);
    assert_eq!(context.pool().get(a).unwrap().engine_refs(), 1);
}

#[test]
fn test_texture_uploads_from_loader_thread() {
    let mut context = RenderContext::new(config(BackendKind::Staged)).unwrap();
    let sender = context.texture_sender();
    std::thread::spawn(move || {
        let desc = TextureDesc { width: 2, height: 2, format: TextureFormat::R8G8B8A8, pixels: vec![0; 16] };
        sender.send("terrain", desc).unwrap();
    })
    .join()
    .unwrap();

    let created = context.process_texture_uploads().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0, "terrain");
    assert_eq!(created[0].1.info().width, 2);
    assert!(context.process_texture_uploads().unwrap().is_empty());
}

#[test]
fn test_begin_frame_resets_stats_but_not_ring_offset() {
    let mut context = RenderContext::new(config(BackendKind::DirectMap)).unwrap();
    context.acquire_vertices(10).unwrap().release().unwrap();
    assert_eq!(context.stats().locks, 1);

    context.begin_frame().unwrap();
    assert_eq!(context.stats(), RenderStats::default());
    let range = context.acquire_vertices(10).unwrap().release().unwrap();
    assert_eq!((range.start, range.mode), (10, LockMode::Append));
    assert_eq!(context.frame_index(), 1);
}

#[test]
fn test_with_device_uses_given_latency() {
    let device_config = EmulatedDeviceConfig { frame_latency: 2, ..EmulatedDeviceConfig::default() };
    let device = Arc::new(Mutex::new(DirectMapDevice::new(device_config)));
    let shared: Arc<Mutex<dyn GraphicsDevice>> = device.clone();
    let mut context = RenderContext::with_device(config(BackendKind::DirectMap), shared).unwrap();

    let range = context.acquire_vertices(3).unwrap().release().unwrap();
    context.set_dynamic_vertex_buffer(&range).unwrap();
    context.draw(PrimitiveKind::TriangleList, 0, 1).unwrap();
    context.end_frame().unwrap();
    context.end_frame().unwrap();
    assert!(device.lock().unwrap().executed_draws().is_empty());
    context.end_frame().unwrap();
    assert_eq!(device.lock().unwrap().executed_draws().len(), 1);
}
