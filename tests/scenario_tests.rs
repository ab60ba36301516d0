//! End-to-End Scenarios
//!
//! Full frames over the recording null backend: world → spatial culling →
//! extraction → sort/batch → pipeline execution → simulated submission.

mod common;

use glam::Vec3;

use arclight::core::frustum::Frustum;
use arclight::render::mesh::MeshRenderComponent;
use arclight::world::spatial::{QueryParams, VisibilityState, find_category};

use common::{CLEAR_COLOR, spawn_cube, test_host, unit_cube};

// ─── S1: empty frame ──────────────────────────────────────────────────────────

#[test]
fn empty_frames_clear_the_backbuffer_and_draw_nothing() {
    let mut host = test_host();

    for _ in 0..16 {
        host.run_frame();
    }

    // The swap-chain image carries exactly the clear color.
    assert_eq!(
        host.stats.simulated_clear_color(host.backbuffer_index),
        Some(CLEAR_COLOR)
    );
    // Reverse-Z: depth clears to 0.
    assert_eq!(host.stats.simulated_clear_depth(host.depth_index), Some(0.0));
    assert_eq!(host.stats.total_draws(), 0);
    // Both attachments bind the view's real targets; the pool stays empty.
    assert_eq!(host.runtime.pool().textures_created(), 0);
}

// ─── S2: single cube ──────────────────────────────────────────────────────────

#[test]
fn single_cube_is_one_draw_and_one_spatial_hit() {
    let mut host = test_host();
    let mesh = unit_cube(&host.runtime);
    spawn_cube(&host.runtime, &mesh, Vec3::ZERO);

    host.run_frame();
    host.run_frame();

    let frame = host.stats.last_frame();
    assert_eq!(frame.draws.len(), 1);
    let draw = &frame.draws[0];
    assert!(draw.indexed);
    assert_eq!(draw.vertex_or_index_count, 36);
    assert_eq!(draw.instance_count, 1);

    // The spatial query agrees.
    let view = host.runtime.render_world().view(host.view).unwrap();
    let frustum: Frustum = view.matrices().frustum;
    let mask = find_category("RenderStatic").bitmask();
    let mut visible = Vec::new();
    let mut params = QueryParams {
        category_bitmask: mask,
        ..Default::default()
    };
    host.runtime.world().read().spatial().find_visible_objects(
        &frustum,
        &mut params,
        &mut visible,
        |_| false,
        VisibilityState::Direct,
    );
    assert_eq!(visible.len(), 1);
}

// ─── S3: instancing ───────────────────────────────────────────────────────────

#[test]
fn thousand_cubes_share_one_instanced_draw() {
    let mut host = test_host();
    let mesh = unit_cube(&host.runtime);
    for i in 0..1000u32 {
        let x = ((i % 32) as f32 - 16.0) * 0.1;
        let y = ((i / 32) as f32 - 16.0) * 0.1;
        spawn_cube(&host.runtime, &mesh, Vec3::new(x, y, 0.0));
    }

    host.run_frame();
    host.run_frame();

    let frame = host.stats.last_frame();
    assert_eq!(frame.draws.len(), 1, "identical mesh+material must batch");
    assert_eq!(frame.draws[0].instance_count, 1000);

    // The per-instance ring advanced by exactly the instance count.
    assert_eq!(
        host.runtime.render_world().render_context().instance_ring_offset(),
        1000
    );
}

// ─── S4: culling ──────────────────────────────────────────────────────────────

#[test]
fn objects_behind_the_camera_are_culled_and_graded_invisible() {
    let mut host = test_host();
    let mesh = unit_cube(&host.runtime);

    // Camera sits at z = -5 looking towards +z: the origin area is seen,
    // anything beyond the camera plane is not.
    let visible_positions = [
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.5, 1.0),
        Vec3::new(-1.0, -0.5, 2.0),
    ];
    let hidden_positions = [Vec3::new(0.0, 0.0, -8.0), Vec3::new(2.0, 0.0, -9.0)];

    for p in visible_positions {
        spawn_cube(&host.runtime, &mesh, p);
    }
    let hidden: Vec<_> = hidden_positions
        .iter()
        .map(|p| spawn_cube(&host.runtime, &mesh, *p))
        .collect();

    host.run_frame();
    host.run_frame();

    let frame = host.stats.last_frame();
    assert_eq!(frame.draws.len(), 1);
    assert_eq!(frame.draws[0].instance_count, 3);

    // Spatial agreement.
    let view = host.runtime.render_world().view(host.view).unwrap();
    let frustum = view.matrices().frustum;
    let mask = find_category("RenderStatic").bitmask();
    let mut visible = Vec::new();
    let mut params = QueryParams {
        category_bitmask: mask,
        ..Default::default()
    };
    let world = host.runtime.world().read();
    world.spatial().find_visible_objects(
        &frustum,
        &mut params,
        &mut visible,
        |_| false,
        VisibilityState::Invisible,
    );
    assert_eq!(visible.len(), 3);

    // Hidden objects never got a visibility stamp.
    for (_, component) in &hidden {
        let spatial = world
            .get_component::<MeshRenderComponent>(*component)
            .unwrap()
            .spatial_data();
        assert_eq!(
            world.spatial().get_visibility_state(spatial, 5),
            VisibilityState::Invisible
        );
    }
}

// ─── Cancellation & device loss ───────────────────────────────────────────────

#[test]
fn cancelled_frames_render_nothing() {
    let mut host = test_host();
    let mesh = unit_cube(&host.runtime);
    spawn_cube(&host.runtime, &mesh, Vec3::ZERO);
    host.run_frame();
    host.run_frame();
    assert_eq!(host.stats.last_frame().draws.len(), 1);

    // Manually drive one frame with a cancellation between phases.
    host.runtime.world().write().update(1.0 / 60.0);
    let view = host.view;
    let world = host.runtime.world().clone();
    let render_world = host.runtime.render_world_mut();
    render_world.add_view_to_render(view);
    render_world.begin_frame();
    // Extraction finished; the host decides to drop the frame.
    render_world.extract(&world.read());
    render_world.cancel_frame();
    render_world.render().unwrap();
    render_world.end_frame().unwrap();

    assert_eq!(host.stats.last_frame().draws.len(), 0);
    assert_eq!(host.stats.last_frame().render_sections, 0);
}

#[test]
fn device_loss_is_sticky_across_frames() {
    let mut host = test_host();
    host.run_frame();

    host.stats.inject_device_loss();
    host.runtime.render_world_mut().add_view_to_render(host.view);
    let result = host.runtime.run_frame(1.0 / 60.0);
    assert!(result.is_err());
    assert!(host.runtime.device().is_device_lost());

    // Every later submission short-circuits without panicking.
    host.runtime.render_world_mut().add_view_to_render(host.view);
    assert!(host.runtime.run_frame(1.0 / 60.0).is_err());
}
