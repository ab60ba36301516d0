//! Per-View Render Context
//!
//! The bundle every pass receives at execution: the view's cameras and
//! cached matrices, the frame's extracted data, the stateful render context,
//! and the renderer registry. Batch iteration happens here so passes stay
//! small.

use std::sync::Arc;

use crate::gal::device::Device;
use crate::gal::encoder::RenderCommandEncoder;

use super::super::category::RenderCategory;
use super::super::context::RenderContext;
use super::super::data::ExtractedRenderData;
use super::super::extract::RendererRegistry;
use super::super::pool::GpuResourcePool;
use super::super::view::{Camera, CameraMatrices, CameraUsageHint, ViewportRect};

pub struct RenderViewContext<'a> {
    pub device: &'a Arc<Device>,
    pub view_name: &'a str,
    pub camera: &'a Camera,
    pub lod_camera: &'a Camera,
    pub matrices: &'a CameraMatrices,
    pub viewport: ViewportRect,
    pub usage: CameraUsageHint,
    pub extracted: &'a ExtractedRenderData,
    pub render_context: &'a mut RenderContext,
    pub renderers: &'a RendererRegistry,
    pub pool: &'a GpuResourcePool,
    pub frame: u64,
}

impl RenderViewContext<'_> {
    /// Draws every batch of `category` through its registered renderer.
    /// Batches whose type has no renderer are skipped.
    pub fn render_data_with_category(
        &mut self,
        encoder: &mut RenderCommandEncoder<'_>,
        category: RenderCategory,
    ) {
        let extracted = self.extracted;
        let renderers = self.renderers;
        for batch in extracted.batches(category) {
            let Some(data_type) = batch.data_type() else {
                continue;
            };
            if let Some(renderer) = renderers.renderer_for(category, data_type) {
                renderer.render_batch(self, encoder, &batch);
            }
        }
    }
}
