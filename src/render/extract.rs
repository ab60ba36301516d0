//! Extraction
//!
//! Extractors walk the world once per view per frame — on a worker thread —
//! and produce the frame's [`ExtractedRenderData`]. Multiple extractors run
//! sequentially per view; different views extract in parallel. The render
//! thread never touches the world.

use std::any::TypeId;

use rustc_hash::FxHashMap;

use crate::core::arena::FrameArena;
use crate::world::World;
use crate::world::object::GameObjectHandle;

use super::category::RenderCategory;
use super::data::{ExtractedRenderData, RenderDataBatch};
use super::view::{Camera, CameraUsageHint, ViewportRect};

/// The slice of view state extraction may read.
pub struct ExtractionView<'a> {
    pub camera: &'a Camera,
    pub lod_camera: &'a Camera,
    pub viewport: ViewportRect,
    pub usage: CameraUsageHint,
    pub frame: u64,
    /// Scratch allocations valid for this extraction pass only; the arena
    /// resets when the view extracts its next frame.
    pub arena: &'a FrameArena,
}

/// Produces render data for the objects a view can see.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    /// `visible` holds the spatial query's survivors for this view.
    fn extract(
        &self,
        view: &ExtractionView<'_>,
        world: &World,
        visible: &[GameObjectHandle],
        out: &mut ExtractedRenderData,
    );
}

// ─── Renderers ────────────────────────────────────────────────────────────────

/// Draws batches of one concrete render-data type within a category.
pub trait Renderer: Send + Sync {
    fn render_batch(
        &self,
        ctx: &mut super::pipeline::view_context::RenderViewContext<'_>,
        encoder: &mut crate::gal::encoder::RenderCommandEncoder<'_>,
        batch: &RenderDataBatch<'_>,
    );
}

/// Maps `(category, render-data type)` to the renderer that draws it.
#[derive(Default)]
pub struct RendererRegistry {
    renderers: FxHashMap<(RenderCategory, TypeId), Box<dyn Renderer>>,
}

impl RendererRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: super::data::RenderData>(
        &mut self,
        category: RenderCategory,
        renderer: impl Renderer + 'static,
    ) {
        self.renderers
            .insert((category, TypeId::of::<T>()), Box::new(renderer));
    }

    #[must_use]
    pub fn renderer_for(
        &self,
        category: RenderCategory,
        data_type: TypeId,
    ) -> Option<&dyn Renderer> {
        self.renderers
            .get(&(category, data_type))
            .map(Box::as_ref)
    }
}
