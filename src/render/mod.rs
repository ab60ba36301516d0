//! Rendering Module
//!
//! The extract/render frame model over the GAL:
//!
//! - [`view`]: cameras, viewports, render targets, usage hints
//! - [`category`] / [`data`] / [`extract`]: per-category render data,
//!   sort-and-batch, extractors and renderers
//! - [`pipeline`]: the compiled pass graph with transient aliasing
//! - [`passes`]: target, forward opaque/transparent, tonemap, blur, debug
//! - [`context`] / [`instance_data`]: draw-state tracking and the
//!   per-instance ring
//! - [`pool`]: transient texture/buffer recycling
//! - [`world`]: the frontend owning views and frame progression
//! - [`mesh`]: the standard mesh component → extractor → renderer path

pub mod category;
pub mod context;
pub mod data;
pub mod extract;
pub mod instance_data;
pub mod mesh;
pub mod passes;
pub mod pipeline;
pub mod pool;
pub mod shaders;
pub mod view;
#[allow(clippy::module_inception)]
pub mod world;

pub use category::{DefaultRenderCategories, RenderCategory, SortCriterion};
pub use context::{ConstantStorageHandle, DrawableGeometry, RenderContext};
pub use data::{ExtractedRenderData, RenderData, RenderDataBatch};
pub use extract::{ExtractionView, Extractor, Renderer, RendererRegistry};
pub use instance_data::{InstanceData, PerInstanceData};
pub use pipeline::{
    PassFactory, PipelineError, PipelineState, RenderPipeline, RenderPipelineHandle,
    RenderPipelinePass, RenderViewContext,
};
pub use pool::GpuResourcePool;
pub use shaders::{CachedShaderLibrary, ShaderLibrary, StubShaderLibrary};
pub use view::{Camera, CameraUsageHint, View, ViewKey, ViewTarget, ViewportRect};
pub use world::{RenderWorld, RenderWorldConfig};
