//! Occluder Component
//!
//! Marks an object as blocking visibility: a local-space box registered in
//! the OcclusionStatic or OcclusionDynamic spatial category depending on the
//! owner's mobility. The render frontend collects these per view and feeds
//! the software rasterizer; the component itself draws nothing.

use glam::Vec3;

use crate::core::bounds::{BoundingBox, BoxSphereBounds};

use super::World;
use super::component::{
    Component, ComponentContext, StorageKind, UpdateCallback, UpdateFunctionDesc, UpdatePhase,
};
use super::spatial::{SpatialDataHandle, find_category};

pub struct OccluderComponent {
    /// Local-space occluder box; usually slightly smaller than the visual
    /// mesh so conservative rasterization stays conservative.
    pub local_bounds: BoundingBox,
    spatial: SpatialDataHandle,
}

impl OccluderComponent {
    #[must_use]
    pub fn new(local_bounds: BoundingBox) -> Self {
        Self {
            local_bounds,
            spatial: SpatialDataHandle::INVALID,
        }
    }

    /// A box of `half_extents` centered on the owner.
    #[must_use]
    pub fn with_half_extents(half_extents: Vec3) -> Self {
        Self::new(BoundingBox::from_center_half_extents(Vec3::ZERO, half_extents))
    }

    #[inline]
    #[must_use]
    pub fn spatial_data(&self) -> SpatialDataHandle {
        self.spatial
    }

    fn world_bounds(&self, ctx: &ComponentContext<'_>) -> BoxSphereBounds {
        let global = ctx.objects.global_transform(ctx.owner);
        BoxSphereBounds::from_box(self.local_bounds.transform(&global))
    }

    pub fn register(world: &mut World) -> Result<(), super::WorldError> {
        world.register_component_type::<Self>(
            "OccluderComponent",
            StorageKind::FreeList,
            |manager| {
                manager.register_update(
                    UpdateFunctionDesc {
                        name: "OccluderComponent::update_bounds",
                        phase: UpdatePhase::PostTransform,
                        dependencies: &[],
                    },
                    UpdateCallback::Sequential(Self::update_bounds),
                );
            },
        )
    }

    fn update_bounds(component: &mut Self, ctx: &mut ComponentContext<'_>) {
        let dynamic = ctx.objects.get(ctx.owner).is_some_and(|o| o.is_dynamic());
        if dynamic && !component.spatial.is_invalid() {
            let bounds = component.world_bounds(ctx);
            ctx.services
                .spatial
                .update_spatial_data_bounds(component.spatial, bounds);
        }
    }
}

impl Component for OccluderComponent {
    fn on_activated(&mut self, ctx: &mut ComponentContext<'_>) {
        let bounds = self.world_bounds(ctx);
        let (category, tags) = {
            let object = ctx.objects.get(ctx.owner);
            let dynamic = object.is_some_and(|o| o.is_dynamic());
            let category = if dynamic {
                find_category("OcclusionDynamic")
            } else {
                find_category("OcclusionStatic")
            };
            (category, object.map(|o| o.tags()).unwrap_or_default())
        };
        self.spatial =
            ctx.services
                .spatial
                .create_spatial_data(bounds, ctx.owner, category.bitmask(), tags);
    }

    fn on_deactivated(&mut self, ctx: &mut ComponentContext<'_>) {
        if !self.spatial.is_invalid() {
            ctx.services.spatial.delete_spatial_data(self.spatial);
            self.spatial = SpatialDataHandle::INVALID;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tasks::TaskPool;
    use crate::world::object::GameObjectDesc;
    use crate::world::spatial::{QueryParams, VisitorFlow};

    #[test]
    fn occluders_register_in_occlusion_categories() {
        let mut world = World::new(0, TaskPool::new(1));
        OccluderComponent::register(&mut world).unwrap();

        let object = world.create_object(&GameObjectDesc::default());
        world
            .create_component(object, OccluderComponent::with_half_extents(Vec3::ONE))
            .unwrap();
        world.update(0.016);

        let mask = find_category("OcclusionStatic").bitmask();
        let mut hits = 0;
        let mut params = QueryParams {
            category_bitmask: mask,
            ..Default::default()
        };
        world.spatial().find_objects_in_box(
            &BoundingBox::from_center_half_extents(Vec3::ZERO, Vec3::splat(4.0)),
            &mut params,
            |_| {
                hits += 1;
                VisitorFlow::Continue
            },
        );
        assert_eq!(hits, 1);
    }
}
