//! Pipeline Graph Tests
//!
//! - Cycles are rejected at compilation and the pipeline is marked invalid;
//!   views bound to it render nothing and the error is reported once.
//! - A pass may reject its negotiated inputs.
//! - Transient aliasing never assigns one physical resource to two
//!   connections with overlapping liveness.

mod common;

use arclight::gal::descriptors::TextureCreationDesc;
use arclight::gal::error::GalResult;
use arclight::render::passes::{BlurPass, OpaqueForwardPass, TargetPass, TonemapPass};
use arclight::render::pipeline::pass::{PassIo, PinDesc, RenderPipelinePass};
use arclight::render::pipeline::view_context::RenderViewContext;
use arclight::render::pipeline::{PipelineError, PipelineState, RenderPipeline};
use arclight::render::view::View;

use common::test_host;

/// A pass with one input and one output used to build shapes the standard
/// passes cannot.
struct RelayPass {
    name: &'static str,
    reject: bool,
}

const RELAY_PINS: &[PinDesc] = &[PinDesc::optional_input("In"), PinDesc::output("Out")];

impl RenderPipelinePass for RelayPass {
    fn name(&self) -> &str {
        self.name
    }

    fn pins(&self) -> &'static [PinDesc] {
        RELAY_PINS
    }

    fn get_render_target_descriptions(
        &self,
        view: &View,
        inputs: &[Option<TextureCreationDesc>],
        outputs: &mut [Option<TextureCreationDesc>],
    ) -> bool {
        if self.reject {
            return false;
        }
        outputs[1] = inputs[0].or_else(|| {
            Some(TextureCreationDesc::render_target(
                view.viewport.width,
                view.viewport.height,
                arclight::gal::format::ResourceFormat::Rgba8Unorm,
            ))
        });
        true
    }

    fn execute(&mut self, _ctx: &mut RenderViewContext<'_>, _io: &PassIo<'_>) -> GalResult<()> {
        Ok(())
    }
}

#[test]
fn cycle_is_rejected_and_pipeline_marked_invalid() {
    let mut host = test_host();

    let mut pipeline = RenderPipeline::new();
    let a = pipeline.add_pass(Box::new(RelayPass { name: "A", reject: false }));
    let b = pipeline.add_pass(Box::new(RelayPass { name: "B", reject: false }));
    pipeline.connect(a, "Out", b, "In").unwrap();
    pipeline.connect(b, "Out", a, "In").unwrap();

    let render_world = host.runtime.render_world_mut();
    let handle = render_world.create_pipeline(pipeline);
    let view_key = host.view;
    render_world.view_mut(view_key).unwrap().pipeline = handle;

    // The frame still runs; the view just renders nothing.
    host.run_frame();

    let pipeline = host.runtime.render_world().pipeline(handle).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Invalid);
    assert_eq!(host.stats.last_frame().draws.len(), 0);
    assert_eq!(host.stats.last_frame().render_sections, 0);
}

#[test]
fn compile_reports_cycle_error() {
    let mut pipeline = RenderPipeline::new();
    let a = pipeline.add_pass(Box::new(RelayPass { name: "A", reject: false }));
    let b = pipeline.add_pass(Box::new(RelayPass { name: "B", reject: false }));
    pipeline.connect(a, "Out", b, "In").unwrap();
    pipeline.connect(b, "Out", a, "In").unwrap();

    let host = test_host();
    let view = host.runtime.render_world().view(host.view).unwrap();
    assert!(matches!(pipeline.compile(view), Err(PipelineError::Cycle)));
}

#[test]
fn pass_may_reject_inputs() {
    let mut pipeline = RenderPipeline::new();
    let a = pipeline.add_pass(Box::new(RelayPass { name: "A", reject: false }));
    let b = pipeline.add_pass(Box::new(RelayPass { name: "B", reject: true }));
    pipeline.connect(a, "Out", b, "In").unwrap();

    let host = test_host();
    let view = host.runtime.render_world().view(host.view).unwrap();
    match pipeline.compile(view) {
        Err(PipelineError::PassRejectedInputs(name)) => assert_eq!(name, "B"),
        other => panic!("expected PassRejectedInputs, got {other:?}"),
    }
    assert_eq!(pipeline.state(), PipelineState::Invalid);
}

#[test]
fn pin_validation_errors() {
    let mut pipeline = RenderPipeline::new();
    let a = pipeline.add_pass(Box::new(RelayPass { name: "A", reject: false }));
    let b = pipeline.add_pass(Box::new(RelayPass { name: "B", reject: false }));

    assert!(matches!(
        pipeline.connect(a, "Nope", b, "In"),
        Err(PipelineError::InvalidPin { .. })
    ));
    // Inputs cannot source a connection, outputs cannot consume one.
    assert!(matches!(
        pipeline.connect(a, "In", b, "In"),
        Err(PipelineError::PinDirection { .. })
    ));
    assert!(matches!(
        pipeline.connect(a, "Out", b, "Out"),
        Err(PipelineError::PinDirection { .. })
    ));
}

#[test]
fn schedule_orders_passes_topologically() {
    let host = test_host();
    let view = host.runtime.render_world().view(host.view).unwrap();

    let mut pipeline = RenderPipeline::new();
    // Added in reverse of the data flow.
    let target = pipeline.add_pass(Box::new(TargetPass::new()));
    let tonemap = pipeline.add_pass(Box::new(TonemapPass::default()));
    let opaque = pipeline.add_pass(Box::new(OpaqueForwardPass::default()));
    pipeline.connect(opaque, "Color", tonemap, "Color").unwrap();
    pipeline.connect(tonemap, "Output", target, "Color0").unwrap();
    pipeline
        .connect(opaque, "DepthStencil", target, "DepthStencil")
        .unwrap();

    pipeline.compile(view).unwrap();
    let order = pipeline.pass_order().unwrap();
    let pos = |node: u32| order.iter().position(|n| *n == node).unwrap();
    assert!(pos(opaque) < pos(tonemap));
    assert!(pos(tonemap) < pos(target));
}

#[test]
fn overlapping_lifetimes_never_share_a_resource() {
    let host = test_host();
    let view = host.runtime.render_world().view(host.view).unwrap();

    // opaque color → tonemap → blur → target: tonemap's input and output
    // overlap at the tonemap pass, as do blur's.
    let mut pipeline = RenderPipeline::new();
    let opaque = pipeline.add_pass(Box::new(OpaqueForwardPass::default()));
    let tonemap = pipeline.add_pass(Box::new(TonemapPass::default()));
    let blur = pipeline.add_pass(Box::new(BlurPass::default()));
    let target = pipeline.add_pass(Box::new(TargetPass::new()));
    pipeline.connect(opaque, "Color", tonemap, "Color").unwrap();
    pipeline.connect(tonemap, "Output", blur, "Input").unwrap();
    pipeline.connect(blur, "Output", target, "Color0").unwrap();
    pipeline
        .connect(opaque, "DepthStencil", target, "DepthStencil")
        .unwrap();

    pipeline.compile(view).unwrap();
    assert!(!pipeline.has_aliasing_violation());
    // Two transient resources are alive at once at the tonemap boundary.
    assert!(pipeline.transient_slot_count() >= 2);
}

#[test]
fn sink_connections_use_no_transients() {
    let host = test_host();
    let view = host.runtime.render_world().view(host.view).unwrap();

    let mut pipeline = RenderPipeline::new();
    let opaque = pipeline.add_pass(Box::new(OpaqueForwardPass::default()));
    let target = pipeline.add_pass(Box::new(TargetPass::new()));
    pipeline.connect(opaque, "Color", target, "Color0").unwrap();
    pipeline
        .connect(opaque, "DepthStencil", target, "DepthStencil")
        .unwrap();

    pipeline.compile(view).unwrap();
    assert_eq!(pipeline.transient_slot_count(), 0);
}
