//! Separable Blur Pass
//!
//! Post-process building block: one fullscreen blur draw per direction,
//! ping-ponging through a pooled intermediate of the input's description.

use std::io;

use bytemuck::{Pod, Zeroable};

use crate::core::stream;
use crate::gal::descriptors::{ColorAttachment, DepthStencilStateDesc, RenderingSetup, TextureCreationDesc};
use crate::gal::error::GalResult;
use crate::gal::pipeline::RenderPassCompatibility;

use super::super::context::ConstantStorageHandle;
use super::super::pipeline::pass::{PassIo, PinDesc, RenderPipelinePass};
use super::super::pipeline::view_context::RenderViewContext;
use super::super::view::View;

const PINS: &[PinDesc] = &[PinDesc::input("Input"), PinDesc::output("Output")];

const PIN_INPUT: usize = 0;
const PIN_OUTPUT: usize = 1;

pub const BLUR_PASS_NAME: &str = "BlurPass";

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Default)]
struct BlurConstants {
    direction: [f32; 2],
    radius: f32,
    _padding: f32,
}

pub struct BlurPass {
    pub radius: f32,
    constants: Option<ConstantStorageHandle>,
}

impl BlurPass {
    #[must_use]
    pub fn new(radius: f32) -> Self {
        Self {
            radius,
            constants: None,
        }
    }

    fn blit(
        &self,
        ctx: &mut RenderViewContext<'_>,
        source: crate::gal::handles::TextureHandle,
        destination: crate::gal::handles::TextureHandle,
        desc: &TextureCreationDesc,
        direction: [f32; 2],
        constants: ConstantStorageHandle,
    ) -> GalResult<()> {
        if let Some(data) = ctx
            .render_context
            .constant_buffer_data_mut::<BlurConstants>(constants)
        {
            data.direction = direction;
            data.radius = self.radius;
        }

        let device = ctx.device.clone();
        if let Some(view) = device.default_resource_view(source) {
            ctx.render_context.bind_resource("blurSource", view);
        }
        ctx.render_context.bind_constant_storage("blurConstants", constants);
        ctx.render_context.set_shader("Blur");
        ctx.render_context
            .set_render_pass_compatibility(RenderPassCompatibility {
                color_formats: smallvec::smallvec![desc.format],
                depth_format: None,
                samples: desc.samples,
            });

        let setup = RenderingSetup {
            color_attachments: smallvec::smallvec![ColorAttachment::clear(destination, [0.0; 4])],
            depth_attachment: None,
            render_area: (0, 0, desc.width, desc.height),
        };
        let mut pass = device.begin_pass(self.name())?;
        {
            let mut encoder = pass.begin_rendering(&setup)?;
            ctx.render_context.draw_fullscreen(&mut encoder)?;
        }
        device.end_pass(pass);
        Ok(())
    }
}

impl Default for BlurPass {
    fn default() -> Self {
        Self::new(4.0)
    }
}

impl RenderPipelinePass for BlurPass {
    fn name(&self) -> &str {
        BLUR_PASS_NAME
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
        let Some(input) = inputs[PIN_INPUT] else {
            return false;
        };
        outputs[PIN_OUTPUT] = Some(input);
        true
    }

    fn execute(&mut self, ctx: &mut RenderViewContext<'_>, io: &PassIo<'_>) -> GalResult<()> {
        let Some(input) = io.pin(PIN_INPUT) else {
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
                    .create_constant_buffer_storage::<BlurConstants>()?;
                self.constants = Some(handle);
                handle
            }
        };

        let device = ctx.device.clone();
        let no_depth = device.create_depth_stencil_state(&DepthStencilStateDesc::disabled())?;
        ctx.render_context.set_depth_stencil_state(no_depth);

        // Horizontal into a pooled intermediate, vertical into the output.
        let intermediate = ctx.pool.get_render_target(&input.desc)?;
        let result = self
            .blit(ctx, input.texture, intermediate, &input.desc, [1.0, 0.0], constants)
            .and_then(|()| {
                self.blit(
                    ctx,
                    intermediate,
                    output.texture,
                    &output.desc,
                    [0.0, 1.0],
                    constants,
                )
            });
        ctx.pool.return_render_target(intermediate);

        let default_depth = device.create_depth_stencil_state(&DepthStencilStateDesc::default())?;
        ctx.render_context.set_depth_stencil_state(default_depth);
        result
    }

    fn serialize_data(&self, w: &mut dyn io::Write) -> io::Result<()> {
        stream::write_f32(w, self.radius)
    }

    fn deserialize_data(&mut self, r: &mut dyn io::Read, _version: u32) -> io::Result<()> {
        self.radius = stream::read_f32(r)?;
        Ok(())
    }
}
