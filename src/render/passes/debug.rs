//! Debug Pass
//!
//! Renders the GUI and SimpleOpaque categories on top of the lit scene:
//! debug geometry, picking highlights, editor overlays. Loads color and
//! depth untouched.

use crate::gal::descriptors::{
    ColorAttachment, DepthAttachment, RenderingSetup, TextureCreationDesc,
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

pub const DEBUG_PASS_NAME: &str = "DebugPass";

pub struct DebugPass {
    simple_opaque: RenderCategory,
    gui: RenderCategory,
}

impl DebugPass {
    #[must_use]
    pub fn new() -> Self {
        Self {
            simple_opaque: find_render_category("SimpleOpaque"),
            gui: find_render_category("GUI"),
        }
    }
}

impl Default for DebugPass {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPipelinePass for DebugPass {
    fn name(&self) -> &str {
        DEBUG_PASS_NAME
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
        if inputs[PIN_COLOR].is_none() {
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

        let setup = RenderingSetup {
            color_attachments: smallvec::smallvec![ColorAttachment::load(color.texture)],
            depth_attachment: io.pin(PIN_DEPTH).map(|d| DepthAttachment::load(d.texture)),
            render_area: (0, 0, color.desc.width, color.desc.height),
        };

        ctx.render_context
            .set_render_pass_compatibility(RenderPassCompatibility {
                color_formats: smallvec::smallvec![color.desc.format],
                depth_format: io.pin(PIN_DEPTH).map(|d| d.desc.format),
                samples: color.desc.samples,
            });

        let mut pass = ctx.device.begin_pass(self.name())?;
        {
            let mut encoder = pass.begin_rendering(&setup)?;
            let simple = self.simple_opaque;
            let gui = self.gui;
            ctx.render_data_with_category(&mut encoder, simple);
            ctx.render_data_with_category(&mut encoder, gui);
        }
        ctx.device.end_pass(pass);
        Ok(())
    }
}
