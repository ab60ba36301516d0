//! Handle Lifetime Tests
//!
//! - Destroying a resource and allocating another never yields an aliasing
//!   handle: the new one differs in index or generation.
//! - Lookups through a destroyed handle return nothing once the deferred
//!   destruction drains.
//! - A handle stays valid for at least the frame its destruction was
//!   requested in.

use std::sync::Arc;

use arclight::gal::descriptors::{BufferCreationDesc, TextureCreationDesc};
use arclight::gal::device::{Device, DeviceConfig};
use arclight::gal::format::ResourceFormat;
use arclight::gal::null::NullBackend;

fn device() -> (Arc<Device>, NullBackend) {
    let backend = NullBackend::new();
    let stats = backend.clone();
    let device = Device::new(Box::new(backend), DeviceConfig::default()).unwrap();
    (device, stats)
}

fn drain_deferred(device: &Arc<Device>) {
    // Deferred destruction drains once the simulated GPU retires the frame.
    for _ in 0..4 {
        device.begin_frame();
        device.end_frame().unwrap();
    }
}

#[test]
fn destroyed_then_reallocated_never_aliases() {
    let (device, _stats) = device();
    let desc = TextureCreationDesc::render_target(64, 64, ResourceFormat::Rgba8Unorm);

    let first = device.create_texture(&desc, None).unwrap();
    device.destroy_texture(first);
    drain_deferred(&device);
    assert!(device.texture_desc(first).is_none(), "stale handle must miss");

    let second = device.create_texture(&desc, None).unwrap();
    assert_ne!(first, second);
    if first.id().index() == second.id().index() {
        assert_ne!(first.id().generation(), second.id().generation());
    }
    // The old handle still misses even though the slot is live again.
    assert!(device.texture_desc(first).is_none());
    assert!(device.texture_desc(second).is_some());
}

#[test]
fn handle_survives_destruction_frame() {
    let (device, _stats) = device();
    let desc = TextureCreationDesc::render_target(32, 32, ResourceFormat::Rgba8Unorm);

    device.begin_frame();
    let texture = device.create_texture(&desc, None).unwrap();
    device.destroy_texture(texture);
    // Still resolvable within the requesting frame.
    assert!(device.texture_desc(texture).is_some());
    device.end_frame().unwrap();

    drain_deferred(&device);
    assert!(device.texture_desc(texture).is_none());
}

#[test]
fn buffer_handles_follow_the_same_rules() {
    let (device, stats) = device();
    let desc = BufferCreationDesc::structured(16, 64);

    let first = device.create_buffer(&desc, None).unwrap();
    assert!(device.buffer_desc(first).is_some());
    device.destroy_buffer(first);
    drain_deferred(&device);

    let second = device.create_buffer(&desc, None).unwrap();
    assert!(device.buffer_desc(first).is_none());
    assert!(device.buffer_desc(second).is_some());
    assert!(stats.buffers_created() >= 2);
}

#[test]
fn double_destroy_is_harmless() {
    let (device, stats) = device();
    let desc = TextureCreationDesc::render_target(16, 16, ResourceFormat::Rgba8Unorm);
    let texture = device.create_texture(&desc, None).unwrap();

    let created = stats.textures_created();
    device.destroy_texture(texture);
    device.destroy_texture(texture);
    drain_deferred(&device);

    assert_eq!(stats.textures_created(), created);
    // Exactly one backend destruction happened for it.
    assert!(device.texture_desc(texture).is_none());
}
