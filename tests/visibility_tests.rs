//! Visibility State Tests
//!
//! Monotonicity: an object graded Direct at frame F reads at least Indirect
//! for every frame in `[F, F + K]` unless its spatial data is deleted in
//! between. Indirect observation never upgrades to Direct.

use glam::{Mat4, Vec3};

use arclight::core::bounds::{BoundingBox, BoxSphereBounds};
use arclight::core::frustum::Frustum;
use arclight::core::tags::TagSet;
use arclight::world::object::GameObjectHandle;
use arclight::world::spatial::{
    CategoryFlags, QueryParams, SpatialSystem, VisibilityState, register_category,
};

fn looking_frustum() -> Frustum {
    Frustum::from_matrix(Mat4::perspective_infinite_reverse_rh(1.0, 1.0, 0.1))
}

fn bounds_at(center: Vec3) -> BoxSphereBounds {
    BoxSphereBounds::from_box(BoundingBox::from_center_half_extents(center, Vec3::ONE))
}

fn run_query(system: &SpatialSystem, mask: u32, visibility: VisibilityState) -> usize {
    let mut out = Vec::new();
    let mut params = QueryParams {
        category_bitmask: mask,
        ..Default::default()
    };
    system.find_visible_objects(&looking_frustum(), &mut params, &mut out, |_| false, visibility);
    out.len()
}

#[test]
fn direct_visibility_is_monotonic_over_the_grace_window() {
    let category = register_category("vis_mono_cat", CategoryFlags::empty());
    let mut system = SpatialSystem::new();
    let handle = system.create_spatial_data(
        bounds_at(Vec3::new(0.0, 0.0, -5.0)),
        GameObjectHandle::INVALID,
        category.bitmask(),
        TagSet::EMPTY,
    );

    const K: u64 = 4;
    assert_eq!(run_query(&system, category.bitmask(), VisibilityState::Direct), 1);
    assert_eq!(system.get_visibility_state(handle, K), VisibilityState::Direct);

    // No further sightings: the grade must hold for K frames.
    for _ in 0..K {
        system.start_new_frame();
        assert!(system.get_visibility_state(handle, K) >= VisibilityState::Indirect);
    }
    system.start_new_frame();
    assert_eq!(system.get_visibility_state(handle, K), VisibilityState::Invisible);
}

#[test]
fn deletion_ends_the_grace_window() {
    let category = register_category("vis_delete_cat", CategoryFlags::empty());
    let mut system = SpatialSystem::new();
    let handle = system.create_spatial_data(
        bounds_at(Vec3::new(0.0, 0.0, -5.0)),
        GameObjectHandle::INVALID,
        category.bitmask(),
        TagSet::EMPTY,
    );

    run_query(&system, category.bitmask(), VisibilityState::Direct);
    assert_eq!(system.get_visibility_state(handle, 10), VisibilityState::Direct);

    system.delete_spatial_data(handle);
    assert_eq!(system.get_visibility_state(handle, 10), VisibilityState::Invisible);
}

#[test]
fn indirect_observation_does_not_upgrade() {
    let category = register_category("vis_indirect_cat", CategoryFlags::empty());
    let mut system = SpatialSystem::new();
    let handle = system.create_spatial_data(
        bounds_at(Vec3::new(0.0, 0.0, -5.0)),
        GameObjectHandle::INVALID,
        category.bitmask(),
        TagSet::EMPTY,
    );

    // Seen by a shadow view only.
    run_query(&system, category.bitmask(), VisibilityState::Indirect);
    assert_eq!(system.get_visibility_state(handle, 4), VisibilityState::Indirect);

    // A later direct sighting upgrades.
    system.start_new_frame();
    run_query(&system, category.bitmask(), VisibilityState::Direct);
    assert_eq!(system.get_visibility_state(handle, 4), VisibilityState::Direct);
}

#[test]
fn direct_outlives_a_newer_indirect_sighting() {
    let category = register_category("vis_mixed_cat", CategoryFlags::empty());
    let mut system = SpatialSystem::new();
    let handle = system.create_spatial_data(
        bounds_at(Vec3::new(0.0, 0.0, -5.0)),
        GameObjectHandle::INVALID,
        category.bitmask(),
        TagSet::EMPTY,
    );

    run_query(&system, category.bitmask(), VisibilityState::Direct);
    system.start_new_frame();
    run_query(&system, category.bitmask(), VisibilityState::Indirect);

    // Both stamps are within the window; the stronger grade wins.
    assert_eq!(system.get_visibility_state(handle, 4), VisibilityState::Direct);
}
