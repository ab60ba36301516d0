//! Target Pass
//!
//! The pipeline sink: eight color inputs plus depth-stencil, bound to the
//! view's actual render targets (swap chain or offscreen set). Does no
//! drawing itself — upstream passes already rendered into the resources its
//! pins alias.

use crate::gal::descriptors::TextureCreationDesc;
use crate::gal::error::GalResult;
use crate::gal::handles::TextureHandle;

use super::super::pipeline::pass::{PassIo, PinDesc, RenderPipelinePass};
use super::super::pipeline::view_context::RenderViewContext;
use super::super::view::{View, ViewTarget};

const PINS: &[PinDesc] = &[
    PinDesc::optional_input("Color0"),
    PinDesc::optional_input("Color1"),
    PinDesc::optional_input("Color2"),
    PinDesc::optional_input("Color3"),
    PinDesc::optional_input("Color4"),
    PinDesc::optional_input("Color5"),
    PinDesc::optional_input("Color6"),
    PinDesc::optional_input("Color7"),
    PinDesc::optional_input("DepthStencil"),
];

pub const TARGET_PASS_NAME: &str = "TargetPass";

#[derive(Default)]
pub struct TargetPass;

impl TargetPass {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn target_for(target: &ViewTarget, pin_name: &str) -> Option<TextureHandle> {
        if pin_name == "DepthStencil" {
            return target.depth_stencil();
        }
        let index: usize = pin_name.strip_prefix("Color")?.parse().ok()?;
        target.color(index)
    }
}

impl RenderPipelinePass for TargetPass {
    fn name(&self) -> &str {
        TARGET_PASS_NAME
    }

    fn pins(&self) -> &'static [PinDesc] {
        PINS
    }

    fn is_sink(&self) -> bool {
        true
    }

    fn sink_target(&self, target: &ViewTarget, pin_name: &str) -> Option<TextureHandle> {
        Self::target_for(target, pin_name)
    }

    /// Every connected pin must have an actual target behind it.
    fn get_render_target_descriptions(
        &self,
        view: &View,
        inputs: &[Option<TextureCreationDesc>],
        _outputs: &mut [Option<TextureCreationDesc>],
    ) -> bool {
        for (pin, input) in PINS.iter().zip(inputs) {
            if input.is_some() && Self::target_for(&view.target, pin.name).is_none() {
                log::error!(
                    "target pass pin '{}' is connected but the view '{}' has no such target",
                    pin.name,
                    view.name
                );
                return false;
            }
        }
        true
    }

    fn execute(&mut self, _ctx: &mut RenderViewContext<'_>, _io: &PassIo<'_>) -> GalResult<()> {
        Ok(())
    }
}
