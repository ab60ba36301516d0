//! Tonemap Pass
//!
//! Maps the HDR scene color to an LDR output with a fullscreen draw.
//! Exposure is a serialized property; the pass owns a small constant-buffer
//! storage slot refreshed when it changes.

use std::io;

use bytemuck::{Pod, Zeroable};

use crate::core::stream;
use crate::gal::descriptors::{
    ColorAttachment, DepthStencilStateDesc, RenderingSetup, TextureCreationDesc, TextureUsage,
};
use crate::gal::error::GalResult;
use crate::gal::format::ResourceFormat;
use crate::gal::pipeline::RenderPassCompatibility;

use super::super::context::ConstantStorageHandle;
use super::super::pipeline::pass::{PassIo, PinDesc, RenderPipelinePass};
use super::super::pipeline::view_context::RenderViewContext;
use super::super::view::View;

const PINS: &[PinDesc] = &[PinDesc::input("Color"), PinDesc::output("Output")];

const PIN_COLOR: usize = 0;
const PIN_OUTPUT: usize = 1;

pub const TONEMAP_PASS_NAME: &str = "TonemapPass";

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Default)]
struct TonemapConstants {
    exposure: f32,
    _padding: [f32; 3],
}

pub struct TonemapPass {
    pub exposure: f32,
    constants: Option<ConstantStorageHandle>,
}

impl TonemapPass {
    #[must_use]
    pub fn new(exposure: f32) -> Self {
        Self {
            exposure,
            constants: None,
        }
    }
}

impl Default for TonemapPass {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RenderPipelinePass for TonemapPass {
    fn name(&self) -> &str {
        TONEMAP_PASS_NAME
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
        let Some(input) = inputs[PIN_COLOR] else {
            return false;
        };
        outputs[PIN_OUTPUT] = Some(TextureCreationDesc {
            format: ResourceFormat::Bgra8Unorm,
            usage: TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
            ..input
        });
        true
    }

    fn execute(&mut self, ctx: &mut RenderViewContext<'_>, io: &PassIo<'_>) -> GalResult<()> {
        let Some(input) = io.pin(PIN_COLOR) else {
            return Ok(());
        };
        let Some(output) = io.pin(PIN_OUTPUT) else {
            return Ok(());
        };

        let constants = match self.constants {
            Some(handle) => handle,
            None => {
                let handle = ctx
                    .render_context
                    .create_constant_buffer_storage::<TonemapConstants>()?;
                self.constants = Some(handle);
                handle
            }
        };
        if let Some(data) = ctx
            .render_context
            .constant_buffer_data_mut::<TonemapConstants>(constants)
        {
            data.exposure = self.exposure;
        }

        let device = ctx.device.clone();
        let setup = RenderingSetup {
            color_attachments: smallvec::smallvec![ColorAttachment::clear(
                output.texture,
                [0.0; 4]
            )],
            depth_attachment: None,
            render_area: (0, 0, output.desc.width, output.desc.height),
        };

        ctx.render_context
            .set_render_pass_compatibility(RenderPassCompatibility {
                color_formats: smallvec::smallvec![output.desc.format],
                depth_format: None,
                samples: output.desc.samples,
            });
        let no_depth = device.create_depth_stencil_state(&DepthStencilStateDesc::disabled())?;
        ctx.render_context.set_depth_stencil_state(no_depth);

        if let Some(view) = device.default_resource_view(input.texture) {
            ctx.render_context.bind_resource("sceneColor", view);
        }
        ctx.render_context.bind_constant_storage("tonemapConstants", constants);
        ctx.render_context.set_shader("Tonemap");

        let mut pass = device.begin_pass(self.name())?;
        {
            let mut encoder = pass.begin_rendering(&setup)?;
            ctx.render_context.draw_fullscreen(&mut encoder)?;
        }
        device.end_pass(pass);

        let default_depth = device.create_depth_stencil_state(&DepthStencilStateDesc::default())?;
        ctx.render_context.set_depth_stencil_state(default_depth);
        Ok(())
    }

    fn serialize_data(&self, w: &mut dyn io::Write) -> io::Result<()> {
        stream::write_f32(w, self.exposure)
    }

    fn deserialize_data(&mut self, r: &mut dyn io::Read, _version: u32) -> io::Result<()> {
        self.exposure = stream::read_f32(r)?;
        Ok(())
    }
}
