//! Concrete Render Passes
//!
//! The minimum viable chain is OpaqueForward → Target; transparent, tonemap,
//! blur, and debug slot in between. [`register_standard_passes`] exposes all
//! of them to pipeline deserialization.

pub mod blur;
pub mod debug;
pub mod opaque_forward;
pub mod target;
pub mod tonemap;
pub mod transparent_forward;

pub use blur::BlurPass;
pub use debug::DebugPass;
pub use opaque_forward::OpaqueForwardPass;
pub use target::TargetPass;
pub use tonemap::TonemapPass;
pub use transparent_forward::TransparentForwardPass;

use super::pipeline::serialize::PassFactory;

/// Registers every standard pass with `factory` for deserialization.
pub fn register_standard_passes(factory: &mut PassFactory) {
    factory.register(target::TARGET_PASS_NAME, || Box::new(TargetPass::new()));
    factory.register(opaque_forward::OPAQUE_FORWARD_PASS_NAME, || {
        Box::new(OpaqueForwardPass::default())
    });
    factory.register(transparent_forward::TRANSPARENT_FORWARD_PASS_NAME, || {
        Box::new(TransparentForwardPass::new())
    });
    factory.register(tonemap::TONEMAP_PASS_NAME, || Box::new(TonemapPass::default()));
    factory.register(blur::BLUR_PASS_NAME, || Box::new(BlurPass::default()));
    factory.register(debug::DEBUG_PASS_NAME, || Box::new(DebugPass::new()));
}
