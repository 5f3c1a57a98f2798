//! Integration tests for render layer logging
//!
//! Install a capturing logger and check what the render layer reports.
//! No GPU required.
//!
//! Run with: cargo test --test logging_integration_tests

use std::sync::{Arc, Mutex};

use serial_test::serial;
use skirmish_render::glam::Vec3;
use skirmish_render::skirmish::device::{DirectMapDevice, GraphicsDevice, PrimitiveKind};
use skirmish_render::skirmish::dynamic::DynamicVertex;
use skirmish_render::skirmish::log::{LogSeverity, MemoryLogger};
use skirmish_render::skirmish::{Engine, RenderConfig, RenderContext};

fn context() -> (Arc<Mutex<DirectMapDevice>>, RenderContext) {
    let config = RenderConfig { frame_latency: 0, enable_validation: true, ..RenderConfig::default() };
    let device = Arc::new(Mutex::new(DirectMapDevice::new(config.device_config())));
    let shared: Arc<Mutex<dyn GraphicsDevice>> = device.clone();
    (device, RenderContext::with_device(config, shared).unwrap())
}

#[test]
#[serial]
fn test_context_creation_is_logged() {
    let logger = MemoryLogger::new();
    Engine::set_logger(logger.clone());

    let _context = context();
    assert!(logger.contains("skirmish::RenderContext", "Render context created"));
    assert_eq!(logger.count(LogSeverity::Error), 0);

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_device_loss_and_recovery_are_logged() {
    let logger = MemoryLogger::new();
    Engine::set_logger(logger.clone());

    let (device, mut context) = context();
    device.lock().unwrap().simulate_device_loss();
    context.end_frame().unwrap();
    context.recover_device().unwrap();

    assert!(logger.contains("skirmish::RenderContext", "Device lost"));
    assert!(logger.contains("skirmish::RenderContext", "Device recovered"));

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_draw_without_vertex_buffer_warns() {
    let logger = MemoryLogger::new();
    let (_device, mut context) = context();
    Engine::set_logger(logger.clone());

    assert!(context.draw(PrimitiveKind::TriangleList, 0, 1).is_err());
    assert_eq!(logger.count(LogSeverity::Warn), 1);
    assert!(logger.contains("skirmish::DrawDispatcher", "no vertex buffer"));

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_forgotten_scope_release_error_is_logged() {
    let logger = MemoryLogger::new();
    let (device, mut context) = context();
    Engine::set_logger(logger.clone());

    let mut scope = context.acquire_vertices(3).unwrap();
    scope
        .write(0, &[DynamicVertex::colored(Vec3::ZERO, 0); 3])
        .unwrap();
    device.lock().unwrap().simulate_device_loss();
    drop(scope);

    assert_eq!(logger.count(LogSeverity::Error), 1);

    Engine::reset_logger();
}
