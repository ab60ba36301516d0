//! Null Backend
//!
//! A fully functional device backend with no GPU behind it. Creation calls
//! allocate simulated resources, command lists record what would have been
//! submitted, and frame control models a double-buffered GPU that retires
//! frame `N` when frame `N + inflight` begins.
//!
//! The simulation is deep enough for the integration suite: render-target
//! clears update a per-texture simulated color, draws and dispatches are
//! counted per frame, buffer updates land in CPU-side contents, and
//! timestamps resolve one frame after submission and expire after the query
//! retention window.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::core::handle::GenIdx;

use super::backend::{
    BufferViewDesc, CommandListBackend, GalBackend, PipelineStage, ResolvedBinding,
    ResolvedComputePipeline, ResolvedGraphicsPipeline, TextureViewDesc, TimestampResult,
};
use super::descriptors::{
    BufferCreationDesc, LoadOp, RenderingSetup, SamplerStateDesc, TextureCreationDesc,
    TextureInitData, TextureSubresource, UpdateMode,
};
use super::error::{GalError, GalResult};
use super::pipeline::IndexFormat;
use super::shader::ShaderCreationDesc;
use super::swapchain::SwapChainCreationDesc;

/// How many frames of GPU work the simulated device keeps in flight.
const SIMULATED_INFLIGHT_FRAMES: u64 = 2;
/// Timestamp queries older than this many frames read back as expired.
const QUERY_RETAIN_FRAMES: u64 = 4;

// ─── Recorded commands ────────────────────────────────────────────────────────

/// One recorded draw, kept for assertions.
#[derive(Clone, Debug)]
pub struct DrawRecord {
    pub pipeline: GenIdx,
    pub vertex_or_index_count: u32,
    pub instance_count: u32,
    pub first_instance: u32,
    pub indexed: bool,
}

#[derive(Clone, Debug, Default)]
pub struct FrameRecord {
    pub draws: Vec<DrawRecord>,
    pub dispatches: u32,
    pub render_sections: u32,
    pub markers: Vec<String>,
}

enum Command {
    BeginRendering(RenderingSetup),
    EndRendering,
    SetGraphicsPipeline(GenIdx),
    SetComputePipeline(GenIdx),
    Draw(DrawRecord),
    Dispatch,
    UpdateBuffer {
        buffer: GenIdx,
        offset: u32,
        data: Vec<u8>,
    },
    CopyTexture {
        src: GenIdx,
        dst: GenIdx,
    },
    Marker(String),
    Timestamp(GenIdx),
}

// ─── Simulated state ──────────────────────────────────────────────────────────

struct SimTexture {
    desc: TextureCreationDesc,
    /// Last color this texture was cleared to on the simulated GPU timeline.
    clear_color: Option<[f32; 4]>,
    clear_depth: Option<f32>,
}

struct SimBuffer {
    desc: BufferCreationDesc,
    contents: Vec<u8>,
}

#[derive(Default)]
struct SimQuery {
    /// Frame the timestamp was recorded in, once a list containing it was
    /// submitted.
    submitted_frame: Option<u64>,
    value_ns: Option<u64>,
}

#[derive(Default)]
struct Inner {
    textures: FxHashMap<u32, SimTexture>,
    buffers: FxHashMap<u32, SimBuffer>,
    shaders: FxHashMap<u32, ShaderCreationDesc>,
    pipelines: FxHashMap<u32, bool>, // true = graphics
    queries: FxHashMap<u32, SimQuery>,
    swap_chains: FxHashMap<u32, SwapChainCreationDesc>,

    current_frame: u64,
    /// Completed frame records, newest last. Bounded.
    finished_frames: Vec<(u64, FrameRecord)>,

    textures_created: u64,
    textures_destroyed: u64,
    buffers_created: u64,
    buffers_destroyed: u64,
    presents: u64,
    fake_clock_ns: u64,

    /// When set, the next `end_frame` reports device loss.
    fail_next_submit: bool,
    lost: bool,
}

/// Shared handle to the null backend. Clone one for assertions and box the
/// other into [`Device::new`](super::device::Device::new).
#[derive(Clone, Default)]
pub struct NullBackend {
    inner: Arc<Mutex<Inner>>,
}

impl NullBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The record of the most recently completed frame.
    #[must_use]
    pub fn last_frame(&self) -> FrameRecord {
        self.inner
            .lock()
            .finished_frames
            .last()
            .map(|(_, record)| record.clone())
            .unwrap_or_default()
    }

    /// Draw count summed over every completed frame.
    #[must_use]
    pub fn total_draws(&self) -> usize {
        self.inner
            .lock()
            .finished_frames
            .iter()
            .map(|(_, r)| r.draws.len())
            .sum()
    }

    /// Number of physical textures created since device start.
    #[must_use]
    pub fn textures_created(&self) -> u64 {
        self.inner.lock().textures_created
    }

    #[must_use]
    pub fn textures_destroyed(&self) -> u64 {
        self.inner.lock().textures_destroyed
    }

    #[must_use]
    pub fn live_texture_count(&self) -> usize {
        self.inner.lock().textures.len()
    }

    #[must_use]
    pub fn presents(&self) -> u64 {
        self.inner.lock().presents
    }

    /// Simulated contents of a texture: the color it was last cleared to.
    #[must_use]
    pub fn simulated_clear_color(&self, texture_index: u32) -> Option<[f32; 4]> {
        self.inner
            .lock()
            .textures
            .get(&texture_index)
            .and_then(|t| t.clear_color)
    }

    /// The depth value a depth target was last cleared to.
    #[must_use]
    pub fn simulated_clear_depth(&self, texture_index: u32) -> Option<f32> {
        self.inner
            .lock()
            .textures
            .get(&texture_index)
            .and_then(|t| t.clear_depth)
    }

    #[must_use]
    pub fn buffers_created(&self) -> u64 {
        self.inner.lock().buffers_created
    }

    #[must_use]
    pub fn buffers_destroyed(&self) -> u64 {
        self.inner.lock().buffers_destroyed
    }

    /// Creation descriptor of a simulated texture, if it is still alive.
    #[must_use]
    pub fn texture_desc(&self, texture_index: u32) -> Option<TextureCreationDesc> {
        self.inner
            .lock()
            .textures
            .get(&texture_index)
            .map(|t| t.desc)
    }

    /// Element stride of a simulated structured buffer.
    #[must_use]
    pub fn buffer_desc(&self, buffer_index: u32) -> Option<BufferCreationDesc> {
        self.inner
            .lock()
            .buffers
            .get(&buffer_index)
            .map(|b| b.desc)
    }

    /// Simulated CPU-side contents of a buffer.
    #[must_use]
    pub fn buffer_contents(&self, buffer_index: u32) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .buffers
            .get(&buffer_index)
            .map(|b| b.contents.clone())
    }

    /// Makes the next submission report device loss.
    pub fn inject_device_loss(&self) {
        self.inner.lock().fail_next_submit = true;
    }
}

struct NullCommandList {
    commands: Vec<Command>,
}

impl CommandListBackend for NullCommandList {
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn push_marker(&mut self, name: &str) {
        self.commands.push(Command::Marker(name.to_owned()));
    }

    fn pop_marker(&mut self) {}

    fn begin_rendering(&mut self, setup: &RenderingSetup) -> GalResult<()> {
        self.commands.push(Command::BeginRendering(setup.clone()));
        Ok(())
    }

    fn end_rendering(&mut self) {
        self.commands.push(Command::EndRendering);
    }

    fn set_graphics_pipeline(&mut self, pipeline: GenIdx) {
        self.commands.push(Command::SetGraphicsPipeline(pipeline));
    }

    fn set_compute_pipeline(&mut self, pipeline: GenIdx) {
        self.commands.push(Command::SetComputePipeline(pipeline));
    }

    fn set_viewport(&mut self, _x: f32, _y: f32, _width: f32, _height: f32) {}
    fn set_scissor(&mut self, _x: u32, _y: u32, _width: u32, _height: u32) {}
    fn bind_vertex_buffer(&mut self, _slot: u32, _buffer: GenIdx, _byte_offset: u32) {}
    fn bind_index_buffer(&mut self, _buffer: GenIdx, _format: IndexFormat, _byte_offset: u32) {}
    fn bind_resource(&mut self, _set: u8, _binding: u8, _view: ResolvedBinding) {}

    fn update_buffer(&mut self, buffer: GenIdx, byte_offset: u32, data: &[u8], _mode: UpdateMode) {
        self.commands.push(Command::UpdateBuffer {
            buffer,
            offset: byte_offset,
            data: data.to_vec(),
        });
    }

    fn copy_texture(
        &mut self,
        src: GenIdx,
        _src_sub: TextureSubresource,
        dst: GenIdx,
        _dst_sub: TextureSubresource,
    ) {
        self.commands.push(Command::CopyTexture { src, dst });
    }

    fn copy_buffer(
        &mut self,
        _src: GenIdx,
        _src_offset: u32,
        _dst: GenIdx,
        _dst_offset: u32,
        _size: u32,
    ) {
    }

    fn resolve_texture(&mut self, src: GenIdx, dst: GenIdx) {
        self.commands.push(Command::CopyTexture { src, dst });
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        first_instance: u32,
    ) {
        self.commands.push(Command::Draw(DrawRecord {
            pipeline: GenIdx::INVALID,
            vertex_or_index_count: vertex_count,
            instance_count,
            first_instance,
            indexed: false,
        }));
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _base_vertex: i32,
        first_instance: u32,
    ) {
        self.commands.push(Command::Draw(DrawRecord {
            pipeline: GenIdx::INVALID,
            vertex_or_index_count: index_count,
            instance_count,
            first_instance,
            indexed: true,
        }));
    }

    fn dispatch(&mut self, _x: u32, _y: u32, _z: u32) {
        self.commands.push(Command::Dispatch);
    }

    fn insert_timestamp(&mut self, query: GenIdx, _stage: PipelineStage) {
        self.commands.push(Command::Timestamp(query));
    }
}

impl GalBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn create_texture(
        &self,
        id: GenIdx,
        desc: &TextureCreationDesc,
        _init: Option<&TextureInitData<'_>>,
    ) -> GalResult<()> {
        let mut inner = self.inner.lock();
        inner.textures.insert(
            id.index(),
            SimTexture {
                desc: *desc,
                clear_color: None,
                clear_depth: None,
            },
        );
        inner.textures_created += 1;
        Ok(())
    }

    fn destroy_texture(&self, id: GenIdx) {
        let mut inner = self.inner.lock();
        if inner.textures.remove(&id.index()).is_some() {
            inner.textures_destroyed += 1;
        }
    }

    fn create_buffer(
        &self,
        id: GenIdx,
        desc: &BufferCreationDesc,
        init: Option<&[u8]>,
    ) -> GalResult<()> {
        let mut contents = vec![0u8; desc.total_size as usize];
        if let Some(init) = init {
            let n = init.len().min(contents.len());
            contents[..n].copy_from_slice(&init[..n]);
        }
        let mut inner = self.inner.lock();
        inner.buffers.insert(id.index(), SimBuffer {
            desc: *desc,
            contents,
        });
        inner.buffers_created += 1;
        Ok(())
    }

    fn destroy_buffer(&self, id: GenIdx) {
        let mut inner = self.inner.lock();
        if inner.buffers.remove(&id.index()).is_some() {
            inner.buffers_destroyed += 1;
        }
    }

    fn create_shader(&self, id: GenIdx, desc: &ShaderCreationDesc) -> GalResult<()> {
        self.inner.lock().shaders.insert(id.index(), desc.clone());
        Ok(())
    }

    fn destroy_shader(&self, id: GenIdx) {
        self.inner.lock().shaders.remove(&id.index());
    }

    fn create_sampler(&self, _id: GenIdx, _desc: &SamplerStateDesc) -> GalResult<()> {
        Ok(())
    }

    fn destroy_sampler(&self, _id: GenIdx) {}

    fn create_texture_view(&self, _id: GenIdx, desc: &TextureViewDesc) -> GalResult<()> {
        if self.inner.lock().textures.contains_key(&desc.texture.index()) {
            Ok(())
        } else {
            Err(GalError::InvalidHandle)
        }
    }

    fn destroy_texture_view(&self, _id: GenIdx) {}

    fn create_buffer_view(&self, _id: GenIdx, desc: &BufferViewDesc) -> GalResult<()> {
        if self.inner.lock().buffers.contains_key(&desc.buffer.index()) {
            Ok(())
        } else {
            Err(GalError::InvalidHandle)
        }
    }

    fn destroy_buffer_view(&self, _id: GenIdx) {}

    fn create_texture_uav(&self, id: GenIdx, desc: &TextureViewDesc) -> GalResult<()> {
        self.create_texture_view(id, desc)
    }

    fn destroy_texture_uav(&self, _id: GenIdx) {}

    fn create_buffer_uav(&self, id: GenIdx, desc: &BufferViewDesc) -> GalResult<()> {
        self.create_buffer_view(id, desc)
    }

    fn destroy_buffer_uav(&self, _id: GenIdx) {}

    fn create_graphics_pipeline(
        &self,
        id: GenIdx,
        resolved: &ResolvedGraphicsPipeline<'_>,
    ) -> GalResult<()> {
        if resolved.shader.bytecode(super::shader::ShaderStage::Vertex).is_none() {
            return Err(GalError::ShaderCompileError {
                stage: "vertex",
                name: "missing bytecode",
            });
        }
        self.inner.lock().pipelines.insert(id.index(), true);
        Ok(())
    }

    fn create_compute_pipeline(
        &self,
        id: GenIdx,
        resolved: &ResolvedComputePipeline<'_>,
    ) -> GalResult<()> {
        if resolved.shader.bytecode(super::shader::ShaderStage::Compute).is_none() {
            return Err(GalError::ShaderCompileError {
                stage: "compute",
                name: "missing bytecode",
            });
        }
        self.inner.lock().pipelines.insert(id.index(), false);
        Ok(())
    }

    fn destroy_pipeline(&self, id: GenIdx) {
        self.inner.lock().pipelines.remove(&id.index());
    }

    fn create_swap_chain(&self, id: GenIdx, desc: &SwapChainCreationDesc) -> GalResult<()> {
        let mut inner = self.inner.lock();
        inner.textures.insert(
            desc.backbuffer_texture.id().index(),
            SimTexture {
                desc: desc.backbuffer_desc(),
                clear_color: None,
                clear_depth: None,
            },
        );
        inner.textures_created += 1;
        inner.swap_chains.insert(id.index(), desc.clone());
        Ok(())
    }

    fn destroy_swap_chain(&self, id: GenIdx) {
        self.inner.lock().swap_chains.remove(&id.index());
    }

    fn acquire_next_image(&self, _id: GenIdx) -> GalResult<()> {
        Ok(())
    }

    fn present(&self, id: GenIdx) -> GalResult<()> {
        let mut inner = self.inner.lock();
        if inner.lost {
            return Err(GalError::DeviceLost);
        }
        if !inner.swap_chains.contains_key(&id.index()) {
            return Err(GalError::InvalidHandle);
        }
        inner.presents += 1;
        Ok(())
    }

    fn create_query(&self, id: GenIdx) -> GalResult<()> {
        self.inner.lock().queries.insert(id.index(), SimQuery::default());
        Ok(())
    }

    fn destroy_query(&self, id: GenIdx) {
        self.inner.lock().queries.remove(&id.index());
    }

    fn get_timestamp_result(&self, id: GenIdx, _force_wait: bool) -> TimestampResult {
        let inner = self.inner.lock();
        let Some(query) = inner.queries.get(&id.index()) else {
            return TimestampResult::Expired;
        };
        match (query.submitted_frame, query.value_ns) {
            (Some(frame), Some(value)) => {
                if inner.current_frame.saturating_sub(frame) > QUERY_RETAIN_FRAMES {
                    TimestampResult::Expired
                } else {
                    TimestampResult::Time(value)
                }
            }
            _ => TimestampResult::NotReady,
        }
    }

    fn begin_frame(&self, frame_index: u64) -> u64 {
        let mut inner = self.inner.lock();
        inner.current_frame = frame_index;
        // Bound the record history.
        let len = inner.finished_frames.len();
        if len > 64 {
            inner.finished_frames.drain(..len - 64);
        }
        frame_index.saturating_sub(SIMULATED_INFLIGHT_FRAMES)
    }

    fn end_frame(&self, lists: Vec<Box<dyn CommandListBackend>>) -> GalResult<()> {
        let mut inner = self.inner.lock();
        if inner.lost {
            return Err(GalError::DeviceLost);
        }
        if inner.fail_next_submit {
            inner.fail_next_submit = false;
            inner.lost = true;
            return Err(GalError::DeviceLost);
        }

        let frame = inner.current_frame;
        let mut record = FrameRecord::default();
        let mut current_pipeline = GenIdx::INVALID;

        for mut list in lists {
            let commands = list
                .as_any_mut()
                .downcast_mut::<NullCommandList>()
                .map(|l| std::mem::take(&mut l.commands))
                .unwrap_or_default();
            for command in commands {
                match command {
                    Command::BeginRendering(setup) => {
                        record.render_sections += 1;
                        for attachment in &setup.color_attachments {
                            if attachment.load_op == LoadOp::Clear
                                && let Some(texture) =
                                    inner.textures.get_mut(&attachment.texture.id().index())
                            {
                                texture.clear_color = Some(attachment.clear_color);
                            }
                        }
                        if let Some(depth) = &setup.depth_attachment
                            && depth.load_op == LoadOp::Clear
                            && let Some(texture) =
                                inner.textures.get_mut(&depth.texture.id().index())
                        {
                            texture.clear_depth = Some(depth.clear_depth);
                        }
                    }
                    Command::EndRendering => {}
                    Command::SetGraphicsPipeline(p) | Command::SetComputePipeline(p) => {
                        current_pipeline = p;
                    }
                    Command::Draw(mut draw) => {
                        draw.pipeline = current_pipeline;
                        record.draws.push(draw);
                    }
                    Command::Dispatch => record.dispatches += 1,
                    Command::UpdateBuffer { buffer, offset, data } => {
                        if let Some(sim) = inner.buffers.get_mut(&buffer.index()) {
                            let start = offset as usize;
                            let end = (start + data.len()).min(sim.contents.len());
                            if start < end {
                                sim.contents[start..end]
                                    .copy_from_slice(&data[..end - start]);
                            }
                        }
                    }
                    Command::CopyTexture { src, dst } => {
                        let color = inner.textures.get(&src.index()).and_then(|t| t.clear_color);
                        if let (Some(color), Some(texture)) =
                            (color, inner.textures.get_mut(&dst.index()))
                        {
                            texture.clear_color = Some(color);
                        }
                    }
                    Command::Marker(name) => record.markers.push(name),
                    Command::Timestamp(query) => {
                        inner.fake_clock_ns += 1_000;
                        let clock = inner.fake_clock_ns;
                        if let Some(sim) = inner.queries.get_mut(&query.index()) {
                            sim.submitted_frame = Some(frame);
                            sim.value_ns = Some(clock);
                        }
                    }
                }
            }
        }

        inner.finished_frames.push((frame, record));
        Ok(())
    }

    fn open_command_list(&self) -> Box<dyn CommandListBackend> {
        Box::new(NullCommandList {
            commands: Vec::new(),
        })
    }

    fn wait_idle(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gal::descriptors::ColorAttachment;
    use crate::gal::device::{Device, DeviceConfig};
    use crate::gal::format::ResourceFormat;

    fn device_with_stats() -> (std::sync::Arc<Device>, NullBackend) {
        let backend = NullBackend::new();
        let device = Device::new(Box::new(backend.clone()), DeviceConfig::default()).unwrap();
        (device, backend)
    }

    #[test]
    fn clear_updates_simulated_color() {
        let (device, stats) = device_with_stats();
        let desc = TextureCreationDesc::render_target(64, 64, ResourceFormat::Rgba8Unorm);
        let texture = device.create_texture(&desc, None).unwrap();

        device.begin_frame();
        let mut pass = device.begin_pass("clear").unwrap();
        {
            let setup = RenderingSetup {
                color_attachments: smallvec::smallvec![ColorAttachment::clear(
                    texture,
                    [0.1, 0.2, 0.3, 1.0]
                )],
                depth_attachment: None,
                render_area: (0, 0, 64, 64),
            };
            let _enc = pass.begin_rendering(&setup).unwrap();
        }
        device.end_pass(pass);
        device.end_frame().unwrap();

        assert_eq!(
            stats.simulated_clear_color(texture.id().index()),
            Some([0.1, 0.2, 0.3, 1.0])
        );
        assert_eq!(stats.last_frame().draws.len(), 0);
    }

    #[test]
    fn injected_device_loss_is_sticky() {
        let (device, stats) = device_with_stats();
        stats.inject_device_loss();

        device.begin_frame();
        assert_eq!(device.end_frame(), Err(GalError::DeviceLost));
        assert!(device.is_device_lost());

        // All further submissions short-circuit.
        assert!(device.begin_pass("anything").is_err());
        device.begin_frame();
        assert_eq!(device.end_frame(), Err(GalError::DeviceLost));
    }
}
