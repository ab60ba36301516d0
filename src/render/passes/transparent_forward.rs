//! Transparent Forward Pass
//!
//! Loads color and depth, switches to alpha blending with read-only depth,
//! and renders the LitTransparent and SimpleTransparent categories —
//! already sorted back-to-front by their category criterion.

use crate::gal::descriptors::{
    BlendStateDesc, ColorAttachment, DepthAttachment, DepthStencilStateDesc, RenderTargetBlend,
    RenderingSetup, TextureCreationDesc,
};
use crate::gal::error::GalResult;
use crate::gal::pipeline::RenderPassCompatibility;

use super::super::category::{RenderCategory, find_render_category};
use super::super::pipeline::pass::{PassIo, PinDesc, RenderPipelinePass};
use super::super::pipeline::view_context::RenderViewContext;
use super::super::view::View;

const PINS: &[PinDesc] = &[
    PinDesc::pass_through("Color"),
    PinDesc::pass_through("DepthStencil"),
];

const PIN_COLOR: usize = 0;
const PIN_DEPTH: usize = 1;

pub const TRANSPARENT_FORWARD_PASS_NAME: &str = "TransparentForwardPass";

pub struct TransparentForwardPass {
    lit_transparent: RenderCategory,
    simple_transparent: RenderCategory,
}

impl TransparentForwardPass {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lit_transparent: find_render_category("LitTransparent"),
            simple_transparent: find_render_category("SimpleTransparent"),
        }
    }
}

impl Default for TransparentForwardPass {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPipelinePass for TransparentForwardPass {
    fn name(&self) -> &str {
        TRANSPARENT_FORWARD_PASS_NAME
    }

    fn pins(&self) -> &'static [PinDesc] {
        PINS
    }

    fn get_render_target_descriptions(
        &self,
        _view: &View,
        inputs: &[Option<TextureCreationDesc>],
        outputs: &mut [Option<TextureCreationDesc>],
    ) -> bool {
        // Transparencies need something to blend over.
        if inputs[PIN_COLOR].is_none() || inputs[PIN_DEPTH].is_none() {
            return false;
        }
        outputs[PIN_COLOR] = inputs[PIN_COLOR];
        outputs[PIN_DEPTH] = inputs[PIN_DEPTH];
        true
    }

    fn execute(&mut self, ctx: &mut RenderViewContext<'_>, io: &PassIo<'_>) -> GalResult<()> {
        let Some(color) = io.pin(PIN_COLOR) else {
            return Ok(());
        };
        let Some(depth) = io.pin(PIN_DEPTH) else {
            return Ok(());
        };

        let setup = RenderingSetup {
            color_attachments: smallvec::smallvec![ColorAttachment::load(color.texture)],
            depth_attachment: Some(DepthAttachment::load(depth.texture)),
            render_area: (0, 0, color.desc.width, color.desc.height),
        };

        ctx.render_context
            .set_render_pass_compatibility(RenderPassCompatibility {
                color_formats: smallvec::smallvec![color.desc.format],
                depth_format: Some(depth.desc.format),
                samples: color.desc.samples,
            });

        let device = ctx.device.clone();
        let blend = device.create_blend_state(&BlendStateDesc {
            targets: [RenderTargetBlend::alpha_blended(); 8],
            alpha_to_coverage: false,
        })?;
        let depth_state = device.create_depth_stencil_state(&DepthStencilStateDesc::read_only())?;
        ctx.render_context.set_blend_state(blend);
        ctx.render_context.set_depth_stencil_state(depth_state);

        let mut pass = device.begin_pass(self.name())?;
        {
            let mut encoder = pass.begin_rendering(&setup)?;
            let lit = self.lit_transparent;
            let simple = self.simple_transparent;
            ctx.render_data_with_category(&mut encoder, lit);
            ctx.render_data_with_category(&mut encoder, simple);
        }
        device.end_pass(pass);

        // Restore opaque defaults for downstream passes.
        let default_blend = device.create_blend_state(&BlendStateDesc::default())?;
        let default_depth = device.create_depth_stencil_state(&DepthStencilStateDesc::default())?;
        ctx.render_context.set_blend_state(default_blend);
        ctx.render_context.set_depth_stencil_state(default_depth);
        Ok(())
    }
}
