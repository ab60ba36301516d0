//! Opaque Forward Pass
//!
//! Clears (or loads) color and depth, then renders the LitOpaque and
//! LitMasked categories through their registered renderers. Consumes an
//! optional SSAO input bound under `ssaoTexture`.

use std::io;

use crate::core::stream;
use crate::gal::descriptors::{
    ColorAttachment, DepthAttachment, RenderingSetup, TextureCreationDesc,
};
use crate::gal::error::GalResult;
use crate::gal::format::ResourceFormat;
use crate::gal::pipeline::RenderPassCompatibility;

use super::super::category::{RenderCategory, find_render_category};
use super::super::pipeline::pass::{PassIo, PinDesc, RenderPipelinePass};
use super::super::pipeline::view_context::RenderViewContext;
use super::super::view::View;

const PINS: &[PinDesc] = &[
    PinDesc::pass_through("Color"),
    PinDesc::pass_through("DepthStencil"),
    PinDesc::optional_input("SSAO"),
];

const PIN_COLOR: usize = 0;
const PIN_DEPTH: usize = 1;
const PIN_SSAO: usize = 2;

pub const OPAQUE_FORWARD_PASS_NAME: &str = "OpaqueForwardPass";

pub struct OpaqueForwardPass {
    /// Clear color+depth instead of loading upstream contents.
    pub clear: bool,
    pub clear_color: [f32; 4],
    lit_opaque: RenderCategory,
    lit_masked: RenderCategory,
}

impl OpaqueForwardPass {
    #[must_use]
    pub fn new(clear: bool, clear_color: [f32; 4]) -> Self {
        Self {
            clear,
            clear_color,
            lit_opaque: find_render_category("LitOpaque"),
            lit_masked: find_render_category("LitMasked"),
        }
    }
}

impl Default for OpaqueForwardPass {
    fn default() -> Self {
        Self::new(true, [0.0, 0.0, 0.0, 1.0])
    }
}

impl RenderPipelinePass for OpaqueForwardPass {
    fn name(&self) -> &str {
        OPAQUE_FORWARD_PASS_NAME
    }

    fn pins(&self) -> &'static [PinDesc] {
        PINS
    }

    fn get_render_target_descriptions(
        &self,
        view: &View,
        inputs: &[Option<TextureCreationDesc>],
        outputs: &mut [Option<TextureCreationDesc>],
    ) -> bool {
        // Forward upstream descriptors; create view-sized defaults when the
        // pass is the chain head.
        outputs[PIN_COLOR] = inputs[PIN_COLOR].or_else(|| {
            Some(TextureCreationDesc::render_target(
                view.viewport.width,
                view.viewport.height,
                ResourceFormat::Bgra8Unorm,
            ))
        });
        outputs[PIN_DEPTH] = inputs[PIN_DEPTH].or_else(|| {
            Some(TextureCreationDesc::render_target(
                view.viewport.width,
                view.viewport.height,
                ResourceFormat::D24UnormS8Uint,
            ))
        });
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
            color_attachments: smallvec::smallvec![if self.clear {
                ColorAttachment::clear(color.texture, self.clear_color)
            } else {
                ColorAttachment::load(color.texture)
            }],
            depth_attachment: Some(if self.clear {
                // Reverse-Z: far plane clears to 0.
                DepthAttachment::clear(depth.texture, 0.0)
            } else {
                DepthAttachment::load(depth.texture)
            }),
            render_area: (0, 0, color.desc.width, color.desc.height),
        };

        ctx.render_context
            .set_render_pass_compatibility(RenderPassCompatibility {
                color_formats: smallvec::smallvec![color.desc.format],
                depth_format: Some(depth.desc.format),
                samples: color.desc.samples,
            });

        if let Some(ssao) = io.pin(PIN_SSAO)
            && let Some(view) = ctx.device.default_resource_view(ssao.texture)
        {
            ctx.render_context.bind_resource("ssaoTexture", view);
        }

        let mut pass = ctx.device.begin_pass(self.name())?;
        {
            let mut encoder = pass.begin_rendering(&setup)?;
            let lit_opaque = self.lit_opaque;
            let lit_masked = self.lit_masked;
            ctx.render_data_with_category(&mut encoder, lit_opaque);
            ctx.render_data_with_category(&mut encoder, lit_masked);
        }
        ctx.device.end_pass(pass);
        Ok(())
    }

    fn serialize_data(&self, w: &mut dyn io::Write) -> io::Result<()> {
        stream::write_bool(w, self.clear)?;
        for channel in self.clear_color {
            stream::write_f32(w, channel)?;
        }
        Ok(())
    }

    fn deserialize_data(&mut self, r: &mut dyn io::Read, _version: u32) -> io::Result<()> {
        self.clear = stream::read_bool(r)?;
        for channel in &mut self.clear_color {
            *channel = stream::read_f32(r)?;
        }
        Ok(())
    }
}
