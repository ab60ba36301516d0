//! Backend Abstraction
//!
//! The device frontend owns handle tables, lifetimes, and validation; a
//! backend turns creation descriptors into API objects and command streams
//! into submissions. Backends address resources by the same [`GenIdx`] the
//! frontend allocated, so translation is a dense-array index on both sides.
//!
//! Two implementations exist: the Vulkan backend (`vulkan` feature) and the
//! recording null backend the test suite and `--headless` runs use.

use std::sync::Arc;

use crate::core::handle::GenIdx;

use super::descriptors::{
    BufferCreationDesc, RenderingSetup, SamplerStateDesc, TextureCreationDesc, TextureInitData,
    TextureSubresource, UpdateMode,
};
use super::error::GalResult;
use super::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, IndexFormat, VertexDeclarationDesc};
use super::shader::ShaderCreationDesc;
use super::swapchain::SwapChainCreationDesc;

/// Pipeline stage for timestamp placement.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PipelineStage {
    TopOfPipe,
    #[default]
    BottomOfPipe,
}

/// Result of a timestamp read.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimestampResult {
    /// Calibrated CPU-clock nanoseconds.
    Time(u64),
    NotReady,
    Expired,
}

/// State descriptors resolved by the frontend before a pipeline reaches the
/// backend, so backends never read the frontend tables.
pub struct ResolvedGraphicsPipeline<'a> {
    pub desc: &'a GraphicsPipelineDesc,
    pub shader: &'a Arc<ShaderCreationDesc>,
    pub vertex_declaration: &'a VertexDeclarationDesc,
    pub blend: super::descriptors::BlendStateDesc,
    pub depth_stencil: super::descriptors::DepthStencilStateDesc,
    pub rasterizer: super::descriptors::RasterizerStateDesc,
}

pub struct ResolvedComputePipeline<'a> {
    pub desc: &'a ComputePipelineDesc,
    pub shader: &'a Arc<ShaderCreationDesc>,
}

/// View creation payloads carry the parent resource id.
#[derive(Clone, Copy, Debug)]
pub struct TextureViewDesc {
    pub texture: GenIdx,
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferViewDesc {
    pub buffer: GenIdx,
    pub byte_offset: u32,
    pub byte_size: u32,
}

/// A command recording session. One is opened per GAL pass and submitted in
/// order at frame end.
pub trait CommandListBackend: Send {
    /// Downcast hook so a backend can recover its concrete list type at
    /// submission.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;

    fn push_marker(&mut self, name: &str);
    fn pop_marker(&mut self);

    fn begin_rendering(&mut self, setup: &RenderingSetup) -> GalResult<()>;
    fn end_rendering(&mut self);

    fn set_graphics_pipeline(&mut self, pipeline: GenIdx);
    fn set_compute_pipeline(&mut self, pipeline: GenIdx);
    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32);
    fn set_scissor(&mut self, x: u32, y: u32, width: u32, height: u32);

    fn bind_vertex_buffer(&mut self, slot: u32, buffer: GenIdx, byte_offset: u32);
    fn bind_index_buffer(&mut self, buffer: GenIdx, format: IndexFormat, byte_offset: u32);
    /// Binds a resource view at `(set, binding)`. The view id addresses the
    /// frontend view table of the kind recorded there.
    fn bind_resource(&mut self, set: u8, binding: u8, view: ResolvedBinding);

    fn update_buffer(&mut self, buffer: GenIdx, byte_offset: u32, data: &[u8], mode: UpdateMode);

    fn copy_texture(
        &mut self,
        src: GenIdx,
        src_sub: TextureSubresource,
        dst: GenIdx,
        dst_sub: TextureSubresource,
    );
    fn copy_buffer(&mut self, src: GenIdx, src_offset: u32, dst: GenIdx, dst_offset: u32, size: u32);
    fn resolve_texture(&mut self, src: GenIdx, dst: GenIdx);

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    );
    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32);

    fn insert_timestamp(&mut self, query: GenIdx, stage: PipelineStage);
}

/// A resource binding after fallback substitution.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResolvedBinding {
    TextureView(GenIdx),
    BufferView(GenIdx),
    TextureUav(GenIdx),
    BufferUav(GenIdx),
    Sampler(GenIdx),
    ConstantBuffer(GenIdx),
}

/// Backend device interface.
///
/// All creation calls are handed the frontend-allocated id; backends keep
/// their objects in dense arrays indexed by `id.index()`.
pub trait GalBackend: Send + Sync {
    fn name(&self) -> &'static str;

    // ── Resources ──────────────────────────────────────────────────────────
    fn create_texture(
        &self,
        id: GenIdx,
        desc: &TextureCreationDesc,
        init: Option<&TextureInitData<'_>>,
    ) -> GalResult<()>;
    fn destroy_texture(&self, id: GenIdx);

    fn create_buffer(
        &self,
        id: GenIdx,
        desc: &BufferCreationDesc,
        init: Option<&[u8]>,
    ) -> GalResult<()>;
    fn destroy_buffer(&self, id: GenIdx);

    fn create_shader(&self, id: GenIdx, desc: &ShaderCreationDesc) -> GalResult<()>;
    fn destroy_shader(&self, id: GenIdx);

    fn create_sampler(&self, id: GenIdx, desc: &SamplerStateDesc) -> GalResult<()>;
    fn destroy_sampler(&self, id: GenIdx);

    fn create_texture_view(&self, id: GenIdx, desc: &TextureViewDesc) -> GalResult<()>;
    fn destroy_texture_view(&self, id: GenIdx);
    fn create_buffer_view(&self, id: GenIdx, desc: &BufferViewDesc) -> GalResult<()>;
    fn destroy_buffer_view(&self, id: GenIdx);
    fn create_texture_uav(&self, id: GenIdx, desc: &TextureViewDesc) -> GalResult<()>;
    fn destroy_texture_uav(&self, id: GenIdx);
    fn create_buffer_uav(&self, id: GenIdx, desc: &BufferViewDesc) -> GalResult<()>;
    fn destroy_buffer_uav(&self, id: GenIdx);

    fn create_graphics_pipeline(
        &self,
        id: GenIdx,
        resolved: &ResolvedGraphicsPipeline<'_>,
    ) -> GalResult<()>;
    fn create_compute_pipeline(
        &self,
        id: GenIdx,
        resolved: &ResolvedComputePipeline<'_>,
    ) -> GalResult<()>;
    fn destroy_pipeline(&self, id: GenIdx);

    // ── Swap chains ────────────────────────────────────────────────────────
    fn create_swap_chain(&self, id: GenIdx, desc: &SwapChainCreationDesc) -> GalResult<()>;
    fn destroy_swap_chain(&self, id: GenIdx);
    /// Acquires the next backbuffer; the frontend's backbuffer texture id
    /// tracks whichever image was acquired.
    fn acquire_next_image(&self, id: GenIdx) -> GalResult<()>;
    fn present(&self, id: GenIdx) -> GalResult<()>;

    // ── Queries ────────────────────────────────────────────────────────────
    fn create_query(&self, id: GenIdx) -> GalResult<()>;
    fn destroy_query(&self, id: GenIdx);
    fn get_timestamp_result(&self, id: GenIdx, force_wait: bool) -> TimestampResult;

    // ── Frame control ──────────────────────────────────────────────────────
    /// Starts CPU frame `frame_index`. Returns the highest frame index whose
    /// GPU work has fully retired; the frontend drains deferred destruction
    /// up to it.
    fn begin_frame(&self, frame_index: u64) -> u64;
    /// Submits every command list recorded this frame, in recording order.
    fn end_frame(&self, lists: Vec<Box<dyn CommandListBackend>>) -> GalResult<()>;
    fn open_command_list(&self) -> Box<dyn CommandListBackend>;

    fn wait_idle(&self);
}
