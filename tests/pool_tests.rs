//! Resource Pool Tests
//!
//! - Get/return cycles of the same descriptor create at most as many
//!   physical textures as were concurrently in flight.
//! - `run_gc(0)` destroys every free entry; aged GC respects the minimum
//!   age.
//! - The pool's live set equals created − destroyed.

use std::sync::Arc;

use arclight::gal::descriptors::TextureCreationDesc;
use arclight::gal::device::{Device, DeviceConfig};
use arclight::gal::format::ResourceFormat;
use arclight::gal::null::NullBackend;
use arclight::render::pool::GpuResourcePool;

fn pool() -> (Arc<Device>, Arc<GpuResourcePool>, NullBackend) {
    let backend = NullBackend::new();
    let stats = backend.clone();
    let device = Device::new(Box::new(backend), DeviceConfig::default()).unwrap();
    let pool = GpuResourcePool::new(device.clone());
    (device, pool, stats)
}

fn target_desc() -> TextureCreationDesc {
    TextureCreationDesc::render_target(1024, 1024, ResourceFormat::Rgba8Unorm)
}

#[test]
fn sequential_get_return_reuses_one_texture() {
    let (device, pool, _stats) = pool();
    let desc = target_desc();

    for _ in 0..50 {
        device.begin_frame();
        let target = pool.get_render_target(&desc).unwrap();
        pool.return_render_target(target);
        device.end_frame().unwrap();
    }

    assert_eq!(pool.textures_created(), 1);
    assert_eq!(pool.live_texture_count(), 1);
}

#[test]
fn concurrent_handouts_bound_the_pool_size() {
    let (_device, pool, _stats) = pool();
    let desc = target_desc();

    // Three concurrently held targets force exactly three physical ones.
    let a = pool.get_render_target(&desc).unwrap();
    let b = pool.get_render_target(&desc).unwrap();
    let c = pool.get_render_target(&desc).unwrap();
    assert_eq!(pool.textures_created(), 3);

    pool.return_render_target(a);
    pool.return_render_target(b);
    pool.return_render_target(c);

    // Later frames recycle; nothing new is created.
    for _ in 0..20 {
        let x = pool.get_render_target(&desc).unwrap();
        let y = pool.get_render_target(&desc).unwrap();
        pool.return_render_target(x);
        pool.return_render_target(y);
    }
    assert_eq!(pool.textures_created(), 3);
}

#[test]
fn distinct_descriptors_do_not_share_entries() {
    let (_device, pool, _stats) = pool();
    let desc_a = target_desc();
    let desc_b = TextureCreationDesc::render_target(512, 512, ResourceFormat::Rgba8Unorm);

    let a = pool.get_render_target(&desc_a).unwrap();
    pool.return_render_target(a);
    let b = pool.get_render_target(&desc_b).unwrap();
    pool.return_render_target(b);

    assert_eq!(pool.textures_created(), 2);
}

#[test]
fn gc_zero_destroys_all_free_entries() {
    let (device, pool, stats) = pool();
    let desc = target_desc();

    // 120 identical frames with one transient in flight.
    for _ in 0..120 {
        device.begin_frame();
        let target = pool.get_render_target(&desc).unwrap();
        pool.return_render_target(target);
        device.end_frame().unwrap();
    }
    assert!(pool.textures_created() <= 3);
    assert_eq!(pool.free_texture_count(), 1);

    pool.run_gc(0);
    assert_eq!(pool.free_texture_count(), 0);
    assert_eq!(pool.live_texture_count(), 0);

    // The deferred destruction reaches the backend after retirement.
    for _ in 0..4 {
        device.begin_frame();
        device.end_frame().unwrap();
    }
    assert_eq!(stats.textures_destroyed(), pool.textures_created());
}

#[test]
fn aged_gc_spares_recent_entries() {
    let (device, pool, _stats) = pool();
    let desc = target_desc();

    device.begin_frame();
    let target = pool.get_render_target(&desc).unwrap();
    pool.return_render_target(target);
    device.end_frame().unwrap();

    // Entry was used this frame; a 10-frame minimum age spares it.
    pool.run_gc(10);
    assert_eq!(pool.free_texture_count(), 1);

    // Push time forward past the age.
    for _ in 0..12 {
        device.begin_frame();
        device.end_frame().unwrap();
    }
    pool.run_gc(10);
    assert_eq!(pool.free_texture_count(), 0);
}

#[test]
fn in_use_entries_are_never_collected() {
    let (_device, pool, _stats) = pool();
    let desc = target_desc();

    let held = pool.get_render_target(&desc).unwrap();
    pool.run_gc(0);
    assert_eq!(pool.in_use_texture_count(), 1);
    assert_eq!(pool.live_texture_count(), 1);
    pool.return_render_target(held);
}
