//! Mesh Rendering
//!
//! The standard visual component: a [`MeshRenderComponent`] registers
//! spatial data when activated, the [`MeshExtractor`] turns visible owners
//! into [`MeshRenderData`] records, and the [`MeshRenderer`] draws whole
//! batches with one instanced call through the per-instance ring.

use std::sync::Arc;

use glam::Mat4;

use crate::core::bounds::{BoundingBox, BoxSphereBounds};
use crate::gal::encoder::RenderCommandEncoder;
use crate::world::World;
use crate::world::component::{
    Component, ComponentContext, StorageKind, UpdateCallback, UpdateFunctionDesc, UpdatePhase,
};
use crate::world::object::GameObjectHandle;
use crate::world::spatial::{SpatialDataHandle, find_category};

use super::category::{
    RenderCategory, find_render_category, render_category_criterion, SortCriterion,
};
use super::context::DrawableGeometry;
use super::data::{ExtractedRenderData, RenderData, RenderDataBatch, distance_sorting_key};
use super::extract::{ExtractionView, Extractor, Renderer, RendererRegistry};
use super::pipeline::view_context::RenderViewContext;

/// Shared mesh description: GAL geometry, material selection, local bounds.
pub struct RenderMesh {
    pub geometry: DrawableGeometry,
    /// Identifies the material permutation; equal ids may instance together.
    pub material_id: u32,
    pub local_bounds: BoundingBox,
    pub shader: &'static str,
}

impl RenderMesh {
    /// Batch id shared by every instance of this mesh+material pairing.
    #[must_use]
    pub fn batch_id(&self) -> u32 {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&self.geometry.vertex_buffer.id().to_raw().to_le_bytes());
        bytes[4..8].copy_from_slice(
            &self
                .geometry
                .index_buffer
                .map_or(u32::MAX, |(b, _)| b.id().to_raw())
                .to_le_bytes(),
        );
        bytes[8..12].copy_from_slice(&self.material_id.to_le_bytes());
        xxhash_rust::xxh32::xxh32(&bytes, 0)
    }
}

// ─── Component ────────────────────────────────────────────────────────────────

pub struct MeshRenderComponent {
    pub mesh: Arc<RenderMesh>,
    pub color: [f32; 4],
    pub category: RenderCategory,
    spatial: SpatialDataHandle,
}

impl MeshRenderComponent {
    #[must_use]
    pub fn new(mesh: Arc<RenderMesh>) -> Self {
        Self {
            mesh,
            color: [1.0; 4],
            category: find_render_category("LitOpaque"),
            spatial: SpatialDataHandle::INVALID,
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: RenderCategory) -> Self {
        self.category = category;
        self
    }

    #[inline]
    #[must_use]
    pub fn spatial_data(&self) -> SpatialDataHandle {
        self.spatial
    }

    fn world_bounds(&self, ctx: &ComponentContext<'_>) -> BoxSphereBounds {
        let global = ctx.objects.global_transform(ctx.owner);
        BoxSphereBounds::from_box(self.mesh.local_bounds.transform(&global))
    }

    /// Registers the manager and its bounds-tracking update.
    pub fn register(world: &mut World) -> Result<(), crate::world::WorldError> {
        world.register_component_type::<Self>(
            "MeshRenderComponent",
            StorageKind::Compact,
            |manager| {
                manager.register_update(
                    UpdateFunctionDesc {
                        name: "MeshRenderComponent::update_bounds",
                        phase: UpdatePhase::PostTransform,
                        dependencies: &[],
                    },
                    UpdateCallback::Sequential(Self::update_bounds),
                );
            },
        )
    }

    fn update_bounds(component: &mut Self, ctx: &mut ComponentContext<'_>) {
        // Static objects register once; only dynamic owners track movement.
        let dynamic = ctx.objects.get(ctx.owner).is_some_and(|o| o.is_dynamic());
        if dynamic && !component.spatial.is_invalid() {
            let bounds = component.world_bounds(ctx);
            ctx.services
                .spatial
                .update_spatial_data_bounds(component.spatial, bounds);
        }
    }
}

impl Component for MeshRenderComponent {
    fn on_activated(&mut self, ctx: &mut ComponentContext<'_>) {
        let bounds = self.world_bounds(ctx);
        let (category, tags) = {
            let object = ctx.objects.get(ctx.owner);
            let dynamic = object.is_some_and(|o| o.is_dynamic());
            let category = if dynamic {
                find_category("RenderDynamic")
            } else {
                find_category("RenderStatic")
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

// ─── Render data ──────────────────────────────────────────────────────────────

pub struct MeshRenderData {
    pub geometry: DrawableGeometry,
    pub shader: &'static str,
    pub batch_id: u32,
    pub world_matrix: Mat4,
    pub color: [f32; 4],
    pub owner: GameObjectHandle,
    pub camera_distance: f32,
}

impl RenderData for MeshRenderData {
    fn batch_id(&self) -> u32 {
        self.batch_id
    }

    fn category_sorting_key(&self, category: RenderCategory, _camera: &super::view::Camera) -> u64 {
        let back_to_front = render_category_criterion(category) == SortCriterion::BackToFront;
        distance_sorting_key(self.camera_distance, back_to_front)
    }

    fn owner(&self) -> GameObjectHandle {
        self.owner
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// ─── Extractor ────────────────────────────────────────────────────────────────

/// Produces [`MeshRenderData`] for every visible object carrying a
/// [`MeshRenderComponent`].
pub struct MeshExtractor;

impl Extractor for MeshExtractor {
    fn name(&self) -> &str {
        "MeshExtractor"
    }

    fn extract(
        &self,
        view: &ExtractionView<'_>,
        world: &World,
        visible: &[GameObjectHandle],
        out: &mut ExtractedRenderData,
    ) {
        let Some(manager) = world.manager::<MeshRenderComponent>() else {
            return;
        };
        let Some(type_index) = world.component_type_index::<MeshRenderComponent>() else {
            return;
        };
        let camera_position = view.lod_camera.position();

        for &owner in visible {
            let Some(object) = world.objects().get(owner) else {
                continue;
            };
            let world_matrix = Mat4::from(world.objects().global_transform(owner));
            for component_handle in object.components() {
                if component_handle.type_index != type_index {
                    continue;
                }
                let Some(component) = manager.get(component_handle.id) else {
                    continue;
                };
                let distance = camera_position.distance(world_matrix.w_axis.truncate());
                out.add_render_data(
                    MeshRenderData {
                        geometry: component.mesh.geometry,
                        shader: component.mesh.shader,
                        batch_id: component.mesh.batch_id(),
                        world_matrix,
                        color: component.color,
                        owner,
                        camera_distance: distance,
                    },
                    component.category,
                    view.camera,
                );
            }
        }
    }
}

// ─── Renderer ─────────────────────────────────────────────────────────────────

/// Draws a mesh batch with one instanced call: fills the per-instance ring,
/// commits it, and issues the draw with the batch's instance count.
pub struct MeshRenderer;

impl MeshRenderer {
    /// Registers this renderer for `category`.
    pub fn register(registry: &mut RendererRegistry, category: RenderCategory) {
        registry.register::<MeshRenderData>(category, Self);
    }
}

impl Renderer for MeshRenderer {
    fn render_batch(
        &self,
        ctx: &mut RenderViewContext<'_>,
        encoder: &mut RenderCommandEncoder<'_>,
        batch: &RenderDataBatch<'_>,
    ) {
        let Some(first) = batch.iter_as::<MeshRenderData>().next() else {
            return;
        };
        let count = batch.len() as u32;

        // Stage instance records.
        {
            let instance_data = ctx.render_context.instance_data();
            let (_, slice) = instance_data.get_instance_data(count);
            for (record, data) in slice.iter_mut().zip(batch.iter_as::<MeshRenderData>()) {
                record.object_to_world = data.world_matrix.to_cols_array_2d();
                record.object_to_world_normal =
                    data.world_matrix.inverse().transpose().to_cols_array_2d();
                record.color = data.color;
                record.game_object_id = data.owner.id().to_raw();
            }
            instance_data.update_instance_data(encoder, count);
        }

        let instance_view = ctx.render_context.instance_data().buffer_view();
        let object_constants = ctx.render_context.instance_data().constant_buffer();
        ctx.render_context.bind_resource("perInstanceData", instance_view);
        ctx.render_context
            .bind_constant_buffer("objectConstants", object_constants);
        ctx.render_context.set_shader(first.shader);

        if let Err(e) = ctx
            .render_context
            .draw_geometry(encoder, &first.geometry, count, 0)
        {
            log::warn!("mesh batch draw failed: {e}");
        }
    }
}
