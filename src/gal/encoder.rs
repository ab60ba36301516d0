//! Command Encoders
//!
//! A [`Pass`] is one named command recording session; inside it the caller
//! opens a render or compute encoder. Encoders validate handles against the
//! frontend tables as they are bound, substitute fallback resources for
//! stale ones, and forward the resolved stream to the backend list.
//!
//! ```ignore
//! let mut pass = device.begin_pass("Opaque")?;
//! {
//!     let mut enc = pass.begin_rendering(&setup)?;
//!     enc.set_pipeline(pipeline);
//!     enc.draw_indexed(index_count, instances, 0, 0, 0);
//! }
//! device.end_pass(pass);
//! ```

use std::sync::Arc;

use super::backend::{CommandListBackend, PipelineStage, ResolvedBinding};
use super::descriptors::{RenderingSetup, TextureSubresource, UpdateMode};
use super::error::{GalError, GalResult};
use super::device::Device;
use super::handles::{
    BufferHandle, PipelineHandle, QueryHandle, ResourceViewHandle, SamplerStateHandle,
    TextureHandle,
};
use super::pipeline::IndexFormat;

/// One recording session between `begin_pass` and `end_pass`.
pub struct Pass {
    device: Arc<Device>,
    list: Box<dyn CommandListBackend>,
    name: String,
}

impl Device {
    /// Opens a named pass. Returns [`GalError::DeviceLost`] once the device
    /// is lost; callers skip recording in that case.
    pub fn begin_pass(self: &Arc<Self>, name: &str) -> GalResult<Pass> {
        if self.is_device_lost() {
            return Err(GalError::DeviceLost);
        }
        let mut list = self.backend().open_command_list();
        list.push_marker(name);
        Ok(Pass {
            device: self.clone(),
            list,
            name: name.to_owned(),
        })
    }

    /// Closes a pass and queues its commands for the frame submission.
    pub fn end_pass(&self, mut pass: Pass) {
        pass.list.pop_marker();
        self.submit_command_list(pass.list);
    }
}

impl Pass {
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Begins rasterization against `setup`'s attachments.
    pub fn begin_rendering(&mut self, setup: &RenderingSetup) -> GalResult<RenderCommandEncoder<'_>> {
        for attachment in &setup.color_attachments {
            if !self.device.texture_is_valid(attachment.texture) {
                return Err(GalError::InvalidHandle);
            }
        }
        if let Some(depth) = &setup.depth_attachment {
            if !self.device.texture_is_valid(depth.texture) {
                return Err(GalError::InvalidHandle);
            }
        }
        self.list.begin_rendering(setup)?;
        Ok(RenderCommandEncoder { pass: self })
    }

    /// Begins a compute section.
    pub fn begin_compute(&mut self) -> ComputeCommandEncoder<'_> {
        ComputeCommandEncoder { pass: self }
    }

    /// Copies one subresource between textures.
    pub fn copy_texture(
        &mut self,
        src: TextureHandle,
        src_sub: TextureSubresource,
        dst: TextureHandle,
        dst_sub: TextureSubresource,
    ) -> GalResult<()> {
        if !self.device.texture_is_valid(src) || !self.device.texture_is_valid(dst) {
            return Err(GalError::InvalidHandle);
        }
        self.list.copy_texture(src.id(), src_sub, dst.id(), dst_sub);
        Ok(())
    }

    pub fn copy_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: u32,
        dst: BufferHandle,
        dst_offset: u32,
        size: u32,
    ) -> GalResult<()> {
        if !self.device.buffer_is_valid(src) || !self.device.buffer_is_valid(dst) {
            return Err(GalError::InvalidHandle);
        }
        self.list
            .copy_buffer(src.id(), src_offset, dst.id(), dst_offset, size);
        Ok(())
    }

    /// Resolves a multisampled texture into a single-sampled one.
    pub fn resolve_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> GalResult<()> {
        if !self.device.texture_is_valid(src) || !self.device.texture_is_valid(dst) {
            return Err(GalError::InvalidHandle);
        }
        self.list.resolve_texture(src.id(), dst.id());
        Ok(())
    }

    /// Updates buffer contents with the chosen orphaning semantics.
    pub fn update_buffer(
        &mut self,
        buffer: BufferHandle,
        byte_offset: u32,
        data: &[u8],
        mode: UpdateMode,
    ) -> GalResult<()> {
        if !self.device.buffer_is_valid(buffer) {
            return Err(GalError::InvalidHandle);
        }
        self.list.update_buffer(buffer.id(), byte_offset, data, mode);
        Ok(())
    }

    pub fn push_marker(&mut self, name: &str) {
        self.list.push_marker(name);
    }

    pub fn pop_marker(&mut self) {
        self.list.pop_marker();
    }

    /// Records a timestamp at `stage`.
    pub fn insert_timestamp(&mut self, query: QueryHandle, stage: PipelineStage) {
        self.list.insert_timestamp(query.id(), stage);
    }

    fn resolve_view(&self, view: ResourceViewHandle) -> Option<ResolvedBinding> {
        let device = &self.device;
        match view {
            ResourceViewHandle::Texture(h) => device
                .texture_view_is_valid(h)
                .then_some(ResolvedBinding::TextureView(h.id())),
            ResourceViewHandle::Buffer(h) => device
                .buffer_view_is_valid(h)
                .then_some(ResolvedBinding::BufferView(h.id())),
            ResourceViewHandle::TextureUav(h) => device
                .texture_uav_is_valid(h)
                .then_some(ResolvedBinding::TextureUav(h.id())),
            ResourceViewHandle::BufferUav(h) => device
                .buffer_uav_is_valid(h)
                .then_some(ResolvedBinding::BufferUav(h.id())),
        }
    }
}

/// Encoder for rasterization work. Dropping it ends the rendering section.
pub struct RenderCommandEncoder<'a> {
    pass: &'a mut Pass,
}

impl RenderCommandEncoder<'_> {
    pub fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pass.list.set_graphics_pipeline(pipeline.id());
    }

    pub fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.pass.list.set_viewport(x, y, width, height);
    }

    pub fn set_scissor(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.pass.list.set_scissor(x, y, width, height);
    }

    pub fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, byte_offset: u32) {
        self.pass.list.bind_vertex_buffer(slot, buffer.id(), byte_offset);
    }

    pub fn bind_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat, byte_offset: u32) {
        self.pass.list.bind_index_buffer(buffer.id(), format, byte_offset);
    }

    /// Binds `view` at `(set, binding)`. A stale handle binds nothing; the
    /// render context is responsible for fallback substitution before this
    /// point, so by here it is a caller error (debug assert).
    pub fn bind_resource(&mut self, set: u8, binding: u8, view: ResourceViewHandle) {
        if let Some(resolved) = self.pass.resolve_view(view) {
            self.pass.list.bind_resource(set, binding, resolved);
        } else {
            debug_assert!(false, "stale resource view bound at set {set} binding {binding}");
        }
    }

    pub fn bind_sampler(&mut self, set: u8, binding: u8, sampler: SamplerStateHandle) {
        self.pass
            .list
            .bind_resource(set, binding, ResolvedBinding::Sampler(sampler.id()));
    }

    pub fn bind_constant_buffer(&mut self, set: u8, binding: u8, buffer: BufferHandle) {
        self.pass
            .list
            .bind_resource(set, binding, ResolvedBinding::ConstantBuffer(buffer.id()));
    }

    pub fn update_buffer(
        &mut self,
        buffer: BufferHandle,
        byte_offset: u32,
        data: &[u8],
        mode: UpdateMode,
    ) {
        self.pass.list.update_buffer(buffer.id(), byte_offset, data, mode);
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.pass
            .list
            .draw(vertex_count, instance_count, first_vertex, first_instance);
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        self.pass.list.draw_indexed(
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        );
    }

    pub fn push_marker(&mut self, name: &str) {
        self.pass.list.push_marker(name);
    }

    pub fn pop_marker(&mut self) {
        self.pass.list.pop_marker();
    }

    pub fn insert_timestamp(&mut self, query: QueryHandle, stage: PipelineStage) {
        self.pass.list.insert_timestamp(query.id(), stage);
    }
}

impl Drop for RenderCommandEncoder<'_> {
    fn drop(&mut self) {
        self.pass.list.end_rendering();
    }
}

/// Encoder for compute dispatches.
pub struct ComputeCommandEncoder<'a> {
    pass: &'a mut Pass,
}

impl ComputeCommandEncoder<'_> {
    pub fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pass.list.set_compute_pipeline(pipeline.id());
    }

    pub fn bind_resource(&mut self, set: u8, binding: u8, view: ResourceViewHandle) {
        if let Some(resolved) = self.pass.resolve_view(view) {
            self.pass.list.bind_resource(set, binding, resolved);
        } else {
            debug_assert!(false, "stale resource view bound at set {set} binding {binding}");
        }
    }

    pub fn bind_constant_buffer(&mut self, set: u8, binding: u8, buffer: BufferHandle) {
        self.pass
            .list
            .bind_resource(set, binding, ResolvedBinding::ConstantBuffer(buffer.id()));
    }

    pub fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        self.pass.list.dispatch(groups_x, groups_y, groups_z);
    }
}
