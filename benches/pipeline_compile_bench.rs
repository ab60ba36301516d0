//! Pipeline compilation and sort/batch micro-benchmarks.

use criterion::{Criterion, criterion_group, criterion_main};

use arclight::gal::handles::TextureHandle;
use arclight::render::category::{SortCriterion, register_render_category};
use arclight::render::data::{ExtractedRenderData, RenderData};
use arclight::render::passes::{
    BlurPass, DebugPass, OpaqueForwardPass, TargetPass, TonemapPass, TransparentForwardPass,
};
use arclight::render::pipeline::RenderPipeline;
use arclight::render::view::{Camera, View, ViewTarget, ViewportRect};
use arclight::world::object::GameObjectHandle;

fn bench_view() -> View {
    View::new(
        "bench",
        Camera::default(),
        ViewportRect {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        },
        ViewTarget::Targets {
            colors: smallvec::smallvec![TextureHandle::INVALID],
            depth_stencil: Some(TextureHandle::INVALID),
        },
    )
}

fn build_pipeline() -> RenderPipeline {
    let mut pipeline = RenderPipeline::new();
    let opaque = pipeline.add_pass(Box::new(OpaqueForwardPass::default()));
    let transparent = pipeline.add_pass(Box::new(TransparentForwardPass::new()));
    let tonemap = pipeline.add_pass(Box::new(TonemapPass::default()));
    let blur = pipeline.add_pass(Box::new(BlurPass::default()));
    let debug = pipeline.add_pass(Box::new(DebugPass::new()));
    let target = pipeline.add_pass(Box::new(TargetPass::new()));
    pipeline.connect(opaque, "Color", transparent, "Color").unwrap();
    pipeline
        .connect(opaque, "DepthStencil", transparent, "DepthStencil")
        .unwrap();
    pipeline.connect(transparent, "Color", tonemap, "Color").unwrap();
    pipeline.connect(tonemap, "Output", blur, "Input").unwrap();
    pipeline.connect(blur, "Output", debug, "Color").unwrap();
    pipeline.connect(debug, "Color", target, "Color0").unwrap();
    pipeline
        .connect(transparent, "DepthStencil", target, "DepthStencil")
        .unwrap();
    pipeline
}

struct BenchData {
    batch: u32,
    key: u64,
}

impl RenderData for BenchData {
    fn batch_id(&self) -> u32 {
        self.batch
    }
    fn category_sorting_key(
        &self,
        _category: arclight::render::category::RenderCategory,
        _camera: &Camera,
    ) -> u64 {
        self.key
    }
    fn owner(&self) -> GameObjectHandle {
        GameObjectHandle::INVALID
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn pipeline_compile(c: &mut Criterion) {
    let view = bench_view();
    c.bench_function("pipeline_compile_6_passes", |b| {
        b.iter(|| {
            let mut pipeline = build_pipeline();
            pipeline.compile(&view).unwrap();
            std::hint::black_box(pipeline.transient_slot_count())
        });
    });
}

fn sort_and_batch_10k(c: &mut Criterion) {
    let category = register_render_category("bench_cat", SortCriterion::Explicit);
    let camera = Camera::default();

    c.bench_function("sort_and_batch_10k", |b| {
        b.iter_with_setup(
            || {
                let mut data = ExtractedRenderData::new();
                for i in 0u32..10_000 {
                    data.add_render_data(
                        BenchData {
                            batch: i % 64,
                            key: u64::from((i * 2_654_435_761) % 1024),
                        },
                        category,
                        &camera,
                    );
                }
                data
            },
            |mut data| {
                data.sort_and_batch();
                std::hint::black_box(data.batch_count(category))
            },
        );
    });
}

criterion_group!(benches, pipeline_compile, sort_and_batch_10k);
criterion_main!(benches);
