//! Render World Frontend
//!
//! Owns views and pipelines, drives frame progression, and double-buffers
//! the extracted-data slots: while the render thread consumes frame `N`, the
//! extraction workers prepare frame `N + 1`. Different views extract in
//! parallel; rendering walks active views in order, which is also the GPU
//! submission order.
//!
//! `cancel_frame` discards pending extraction and skips rendering; transient
//! resources acquired for a cancelled frame return to the pool untouched.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::core::handle::HandleTable;
use crate::core::tasks::TaskPool;
use crate::gal::device::Device;
use crate::gal::error::GalResult;
use crate::world::World;
use crate::world::occlusion::{DEFAULT_HEIGHT, DEFAULT_WIDTH, DepthBufferPool, RasterizerView};
use crate::world::spatial::{QueryParams, VisibilityState, find_category};

use super::context::RenderContext;
use super::data::ExtractedRenderData;
use super::extract::{ExtractionView, Extractor, RendererRegistry};
use super::pipeline::pipeline::{PipelineState, RenderPipeline, RenderPipelineHandle};
use super::pipeline::view_context::RenderViewContext;
use super::pool::GpuResourcePool;
use super::shaders::ShaderLibrary;
use super::view::{CameraUsageHint, View, ViewKey, ViewTarget};

#[derive(Clone, Debug)]
pub struct RenderWorldConfig {
    /// Whether a Reflection-usage view grades objects as directly visible.
    /// Configuration, not hard-coded: editor reflection probes want it off,
    /// planar mirrors in gameplay want it on.
    pub reflection_counts_direct: bool,
    /// Ring capacity of the per-instance buffer.
    pub max_instances: u32,
    /// Drive the software occlusion rasterizer for main views.
    pub occlusion_culling: bool,
    pub occlusion_resolution: (u32, u32),
}

impl Default for RenderWorldConfig {
    fn default() -> Self {
        Self {
            reflection_counts_direct: false,
            max_instances: super::instance_data::DEFAULT_MAX_INSTANCES,
            occlusion_culling: false,
            occlusion_resolution: (DEFAULT_WIDTH, DEFAULT_HEIGHT),
        }
    }
}

/// One double-buffer slot of per-view extraction results.
#[derive(Default)]
struct FrameSlot {
    per_view: FxHashMap<ViewKey, ExtractedRenderData>,
}

pub struct RenderWorld {
    device: Arc<Device>,
    pool: Arc<GpuResourcePool>,
    config: RenderWorldConfig,

    views: SlotMap<ViewKey, View>,
    pipelines: HandleTable<RenderPipeline>,

    /// `slots[frame & 1]` is being extracted, the other one rendered.
    slots: [FrameSlot; 2],
    frame_counter: u64,
    views_to_render: Vec<ViewKey>,
    cancelled: bool,

    render_context: RenderContext,
    renderers: RendererRegistry,
    world_extractors: Vec<Box<dyn Extractor>>,

    occlusion_buffers: DepthBufferPool,
    rasterizers: FxHashMap<ViewKey, RasterizerView>,
    /// Per-view extraction scratch arenas, recycled across frames.
    arenas: FxHashMap<ViewKey, crate::core::arena::FrameArena>,

    task_pool: TaskPool,
}

impl RenderWorld {
    pub fn new(
        device: Arc<Device>,
        pool: Arc<GpuResourcePool>,
        shader_library: Arc<dyn ShaderLibrary>,
        renderers: RendererRegistry,
        config: RenderWorldConfig,
        task_pool: TaskPool,
    ) -> GalResult<Self> {
        super::category::DefaultRenderCategories::register();
        let render_context =
            RenderContext::new(device.clone(), shader_library, config.max_instances)?;
        Ok(Self {
            device,
            pool,
            config,
            views: SlotMap::with_key(),
            pipelines: HandleTable::new(),
            slots: [FrameSlot::default(), FrameSlot::default()],
            frame_counter: 0,
            views_to_render: Vec::new(),
            cancelled: false,
            render_context,
            renderers,
            world_extractors: Vec::new(),
            occlusion_buffers: DepthBufferPool::new(),
            rasterizers: FxHashMap::default(),
            arenas: FxHashMap::default(),
            task_pool,
        })
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    #[inline]
    #[must_use]
    pub fn render_context(&self) -> &RenderContext {
        &self.render_context
    }

    pub fn add_world_extractor(&mut self, extractor: Box<dyn Extractor>) {
        self.world_extractors.push(extractor);
    }

    // ── Views & pipelines ──────────────────────────────────────────────────

    pub fn create_view(&mut self, view: View) -> ViewKey {
        self.views.insert(view)
    }

    #[must_use]
    pub fn view(&self, key: ViewKey) -> Option<&View> {
        self.views.get(key)
    }

    #[must_use]
    pub fn view_mut(&mut self, key: ViewKey) -> Option<&mut View> {
        self.views.get_mut(key)
    }

    pub fn destroy_view(&mut self, key: ViewKey) {
        self.views.remove(key);
        self.rasterizers.remove(&key);
        for slot in &mut self.slots {
            slot.per_view.remove(&key);
        }
    }

    pub fn create_pipeline(&mut self, pipeline: RenderPipeline) -> RenderPipelineHandle {
        RenderPipelineHandle::from_id(self.pipelines.insert(pipeline))
    }

    #[must_use]
    pub fn pipeline(&self, handle: RenderPipelineHandle) -> Option<&RenderPipeline> {
        self.pipelines.get(handle.id())
    }

    #[must_use]
    pub fn pipeline_mut(&mut self, handle: RenderPipelineHandle) -> Option<&mut RenderPipeline> {
        self.pipelines.get_mut(handle.id())
    }

    /// Queues a view for this frame. Idempotent per frame.
    pub fn add_view_to_render(&mut self, key: ViewKey) {
        if !self.views_to_render.contains(&key) && self.views.contains_key(key) {
            self.views_to_render.push(key);
        }
    }

    // ── Frame progression ──────────────────────────────────────────────────

    /// Advances the frame: the device rolls its frame slot, view matrices
    /// refresh, and the extraction-side buffer clears for refill.
    pub fn begin_frame(&mut self) -> u64 {
        self.frame_counter = self.device.begin_frame();
        self.cancelled = false;
        self.render_context.begin_frame();

        for view in self.views.values_mut() {
            view.update_matrices();
        }

        let extract_slot = (self.frame_counter & 1) as usize;
        for data in self.slots[extract_slot].per_view.values_mut() {
            data.clear();
        }
        self.frame_counter
    }

    fn visibility_for_usage(&self, usage: CameraUsageHint) -> VisibilityState {
        match usage {
            CameraUsageHint::MainView | CameraUsageHint::EditorView | CameraUsageHint::Culling => {
                VisibilityState::Direct
            }
            CameraUsageHint::Reflection if self.config.reflection_counts_direct => {
                VisibilityState::Direct
            }
            CameraUsageHint::None => VisibilityState::Invisible,
            _ => VisibilityState::Indirect,
        }
    }

    /// Runs culling and extraction for every queued view. Views extract in
    /// parallel on the worker pool; within one view the extractors run
    /// sequentially. Extraction completes before rendering starts — the
    /// barrier is this function returning.
    pub fn extract(&mut self, world: &World) {
        if self.cancelled {
            return;
        }
        let extract_slot = (self.frame_counter & 1) as usize;
        let frame = self.frame_counter;

        let render_static = find_category("RenderStatic");
        let render_dynamic = find_category("RenderDynamic");
        let occlusion_static = find_category("OcclusionStatic");
        let occlusion_dynamic = find_category("OcclusionDynamic");
        let render_mask = render_static.bitmask() | render_dynamic.bitmask();
        let occluder_mask = occlusion_static.bitmask() | occlusion_dynamic.bitmask();

        // Compile pipelines lazily; invalid ones keep their views dark.
        for &key in &self.views_to_render {
            let Some(view) = self.views.get(key) else {
                continue;
            };
            let Some(pipeline) = self.pipelines.get_mut(view.pipeline.id()) else {
                continue;
            };
            if pipeline.state() == PipelineState::Uncompiled {
                let _ = pipeline.compile(view);
            }
        }

        // Per-view work items own their output slot for the parallel phase.
        struct WorkItem<'a> {
            key: ViewKey,
            view: &'a View,
            visibility: VisibilityState,
            extracted: ExtractedRenderData,
            rasterizer: Option<RasterizerView>,
            arena: crate::core::arena::FrameArena,
            extractors: Vec<&'a dyn Extractor>,
        }

        let mut items: Vec<WorkItem<'_>> = Vec::with_capacity(self.views_to_render.len());
        for &key in &self.views_to_render {
            let Some(view) = self.views.get(key) else {
                continue;
            };
            let Some(pipeline) = self.pipelines.get(view.pipeline.id()) else {
                continue;
            };
            if pipeline.state() != PipelineState::Compiled {
                continue;
            }

            let mut extractors: Vec<&dyn Extractor> = self
                .world_extractors
                .iter()
                .map(Box::as_ref)
                .collect();
            extractors.extend(pipeline.extractors().iter().map(Box::as_ref));

            let rasterizer = (self.config.occlusion_culling
                && view.usage == CameraUsageHint::MainView)
                .then(|| {
                    self.rasterizers.remove(&key).unwrap_or_else(|| {
                        RasterizerView::new(
                            self.config.occlusion_resolution.0,
                            self.config.occlusion_resolution.1,
                        )
                    })
                });

            items.push(WorkItem {
                key,
                view,
                visibility: self.visibility_for_usage(view.usage),
                extracted: self.slots[extract_slot]
                    .per_view
                    .remove(&key)
                    .unwrap_or_default(),
                rasterizer,
                arena: self.arenas.remove(&key).unwrap_or_default(),
                extractors,
            });
        }

        let occlusion_buffers = &self.occlusion_buffers;
        self.task_pool.for_each_mut(&mut items, |_, item| {
            let view = item.view;
            let frustum = view.cull_frustum();

            // Occluder boxes feed the rasterizer before visibility runs.
            if let Some(rasterizer) = item.rasterizer.as_mut() {
                rasterizer.begin_scene(occlusion_buffers, view.matrices().view_projection);
                let mut params = QueryParams {
                    category_bitmask: occluder_mask,
                    ..Default::default()
                };
                world.spatial().visit_visible_bounds(&frustum, &mut params, |_, aabb| {
                    rasterizer.add_occluder_box(aabb);
                    crate::world::spatial::VisitorFlow::Continue
                });
                rasterizer.end_scene();
            }

            let mut visible = Vec::new();
            let mut params = QueryParams {
                category_bitmask: render_mask,
                ..Default::default()
            };
            let rasterizer = item.rasterizer.as_ref();
            world.spatial().find_visible_objects(
                &frustum,
                &mut params,
                &mut visible,
                |aabb| rasterizer.is_some_and(|r| !r.is_visible(aabb)),
                item.visibility,
            );

            // Scratch from the previous frame dies here; extractor-held
            // stamps stop validating.
            item.arena.reset();
            let extraction_view = ExtractionView {
                camera: &view.camera,
                lod_camera: view.lod_camera(),
                viewport: view.viewport,
                usage: view.usage,
                frame,
                arena: &item.arena,
            };
            item.extracted.clear();
            for extractor in &item.extractors {
                extractor.extract(&extraction_view, world, &visible, &mut item.extracted);
            }
            item.extracted.sort_and_batch();
        });

        for item in items {
            self.slots[extract_slot].per_view.insert(item.key, item.extracted);
            if let Some(rasterizer) = item.rasterizer {
                self.rasterizers.insert(item.key, rasterizer);
            }
            self.arenas.insert(item.key, item.arena);
        }
    }

    /// Executes each queued view's pipeline against the freshly extracted
    /// data. Submission order equals traversal order.
    pub fn render(&mut self) -> GalResult<()> {
        if self.cancelled {
            return Ok(());
        }
        let slot = (self.frame_counter & 1) as usize;
        let empty = ExtractedRenderData::default();

        for &key in &self.views_to_render {
            let Some(view) = self.views.get_mut(key) else {
                continue;
            };
            let Some(pipeline) = self.pipelines.get_mut(view.pipeline.id()) else {
                continue;
            };
            if pipeline.state() != PipelineState::Compiled {
                continue;
            }

            // The swap-chain image must be acquired before its texture is
            // bound as a target.
            if let ViewTarget::SwapChain { handle, .. } = &view.target {
                let _ = self.device.backend().acquire_next_image(handle.id());
            }

            let extracted = self.slots[slot].per_view.get(&key).unwrap_or(&empty);
            // Copies, so the context does not alias the view the pipeline
            // mutates for read-backs.
            let camera = view.camera;
            let lod_camera = *view.lod_camera();
            let matrices = *view.matrices();
            let view_name = view.name.clone();
            let mut ctx = RenderViewContext {
                device: &self.device,
                view_name: &view_name,
                camera: &camera,
                lod_camera: &lod_camera,
                matrices: &matrices,
                viewport: view.viewport,
                usage: view.usage,
                extracted,
                render_context: &mut self.render_context,
                renderers: &self.renderers,
                pool: &self.pool,
                frame: self.frame_counter,
            };
            pipeline.execute(view, &mut ctx, &self.pool)?;
        }
        Ok(())
    }

    /// Submits the frame and presents every swap chain that was rendered.
    pub fn end_frame(&mut self) -> GalResult<()> {
        let result = if self.cancelled {
            self.device.end_frame().map(|()| ())
        } else {
            let submit = self.device.end_frame();
            if submit.is_ok() {
                for &key in &self.views_to_render {
                    if let Some(View {
                        target: ViewTarget::SwapChain { handle, .. },
                        ..
                    }) = self.views.get(key)
                    {
                        let _ = self.device.present(*handle);
                    }
                }
            }
            submit
        };
        self.views_to_render.clear();
        result
    }

    /// Aborts the current frame between phases: pending extraction output is
    /// dropped and `render` becomes a no-op. In-progress tasks complete
    /// first (the extract barrier already guarantees that).
    pub fn cancel_frame(&mut self) {
        self.cancelled = true;
        let slot = (self.frame_counter & 1) as usize;
        for data in self.slots[slot].per_view.values_mut() {
            data.clear();
        }
    }

    pub fn shutdown(&mut self) {
        self.render_context.shutdown();
    }
}
