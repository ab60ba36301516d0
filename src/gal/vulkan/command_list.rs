//! Vulkan Command Recording
//!
//! Commands are recorded straight into a `vk::CommandBuffer` taken from the
//! current frame slot. Bindings accumulate in a small table and flush into a
//! transient descriptor set at the next draw or dispatch; attachment layout
//! transitions happen on the render-pass boundaries, so sampled resources are
//! always in `SHADER_READ_ONLY_OPTIMAL` between passes.

use std::sync::Arc;

use ash::vk;
use rustc_hash::FxHashMap;

use crate::core::handle::GenIdx;
use crate::gal::backend::{CommandListBackend, PipelineStage, ResolvedBinding};
use crate::gal::descriptors::{RenderingSetup, TextureSubresource, UpdateMode};
use crate::gal::error::GalResult;
use crate::gal::pipeline::IndexFormat;

use super::conv;
use super::device::VkShared;
use super::pipelines::VkPipeline;
use super::renderpass_cache::{FramebufferKey, RenderPassKey};

pub(super) struct VkCommandList {
    pub shared: Arc<VkShared>,
    pub cb: vk::CommandBuffer,
    pipeline: Option<Arc<VkPipeline>>,
    bindings: FxHashMap<(u8, u8), ResolvedBinding>,
    dirty_sets: u32,
    in_render_pass: bool,
    debug_depth: u32,
}

impl VkCommandList {
    pub fn open(shared: Arc<VkShared>) -> Self {
        let cb = {
            let mut frames = shared.frames.lock();
            let current = frames.current;
            let slot = &mut frames.slots[current];
            let cb = slot.free_buffers.pop().unwrap_or_else(|| {
                let info = vk::CommandBufferAllocateInfo::default()
                    .command_pool(slot.command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1);
                unsafe {
                    shared
                        .device
                        .allocate_command_buffers(&info)
                        .expect("command buffer allocation")[0]
                }
            });
            slot.used_buffers.push(cb);
            cb
        };
        let begin = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            shared
                .device
                .begin_command_buffer(cb, &begin)
                .expect("command buffer begin");
        }
        Self {
            shared,
            cb,
            pipeline: None,
            bindings: FxHashMap::default(),
            dirty_sets: u32::MAX,
            in_render_pass: false,
            debug_depth: 0,
        }
    }

    pub fn finish(&mut self) {
        if self.in_render_pass {
            self.end_rendering();
        }
        unsafe {
            self.shared
                .device
                .end_command_buffer(self.cb)
                .expect("command buffer end");
        }
    }

    fn flush_bindings(&mut self) {
        let Some(pipeline) = self.pipeline.clone() else {
            return;
        };
        if self.dirty_sets == 0 {
            return;
        }
        let device = &self.shared.device;
        let tables = self.shared.tables.lock();

        for (set_index, key) in pipeline.layout_keys.iter().enumerate() {
            if self.dirty_sets & (1 << set_index) == 0 || key.bindings.is_empty() {
                continue;
            }
            let layout = pipeline.set_layouts[set_index];
            let descriptor_set = {
                let mut frames = self.shared.frames.lock();
                let current = frames.current;
                frames.slots[current].descriptors.allocate(device, layout)
            };

            // Written structures must stay alive until update_descriptor_sets.
            let mut image_infos: Vec<[vk::DescriptorImageInfo; 1]> = Vec::new();
            let mut buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = Vec::new();
            let mut writes: Vec<(u32, vk::DescriptorType, bool, usize)> = Vec::new();

            for binding in &key.bindings {
                if binding.immutable_sampler.is_some() {
                    continue;
                }
                let Some(bound) = self
                    .bindings
                    .get(&(set_index as u8, binding.binding as u8))
                else {
                    continue;
                };
                match *bound {
                    ResolvedBinding::TextureView(id) => {
                        if let Some(view) = tables.texture_views.get(id.index()) {
                            image_infos.push([vk::DescriptorImageInfo::default()
                                .image_view(view.view)
                                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)]);
                            writes.push((
                                binding.binding,
                                binding.descriptor_type,
                                true,
                                image_infos.len() - 1,
                            ));
                        }
                    }
                    ResolvedBinding::TextureUav(id) => {
                        if let Some(view) = tables.texture_uavs.get(id.index()) {
                            image_infos.push([vk::DescriptorImageInfo::default()
                                .image_view(view.view)
                                .image_layout(vk::ImageLayout::GENERAL)]);
                            writes.push((
                                binding.binding,
                                vk::DescriptorType::STORAGE_IMAGE,
                                true,
                                image_infos.len() - 1,
                            ));
                        }
                    }
                    ResolvedBinding::BufferView(id) | ResolvedBinding::BufferUav(id) => {
                        let record = if matches!(bound, ResolvedBinding::BufferView(_)) {
                            tables.buffer_views.get(id.index())
                        } else {
                            tables.buffer_uavs.get(id.index())
                        };
                        if let Some(view) = record
                            && let Some(buffer) = tables.buffers.get(view.buffer_index)
                        {
                            buffer_infos.push([vk::DescriptorBufferInfo::default()
                                .buffer(buffer.buffer)
                                .offset(u64::from(view.offset))
                                .range(u64::from(view.size))]);
                            writes.push((
                                binding.binding,
                                vk::DescriptorType::STORAGE_BUFFER,
                                false,
                                buffer_infos.len() - 1,
                            ));
                        }
                    }
                    ResolvedBinding::ConstantBuffer(id) => {
                        if let Some(buffer) = tables.buffers.get(id.index()) {
                            buffer_infos.push([vk::DescriptorBufferInfo::default()
                                .buffer(buffer.buffer)
                                .offset(0)
                                .range(u64::from(buffer.desc.total_size))]);
                            writes.push((
                                binding.binding,
                                vk::DescriptorType::UNIFORM_BUFFER,
                                false,
                                buffer_infos.len() - 1,
                            ));
                        }
                    }
                    ResolvedBinding::Sampler(id) => {
                        if let Some(sampler) = tables.samplers.get(id.index()) {
                            image_infos.push([vk::DescriptorImageInfo::default().sampler(*sampler)]);
                            writes.push((
                                binding.binding,
                                vk::DescriptorType::SAMPLER,
                                true,
                                image_infos.len() - 1,
                            ));
                        }
                    }
                }
            }

            let descriptor_writes: Vec<vk::WriteDescriptorSet> = writes
                .iter()
                .map(|(binding, ty, is_image, index)| {
                    let write = vk::WriteDescriptorSet::default()
                        .dst_set(descriptor_set)
                        .dst_binding(*binding)
                        .descriptor_type(*ty);
                    if *is_image {
                        write.image_info(&image_infos[*index])
                    } else {
                        write.buffer_info(&buffer_infos[*index])
                    }
                })
                .collect();
            if !descriptor_writes.is_empty() {
                unsafe { device.update_descriptor_sets(&descriptor_writes, &[]) };
            }

            unsafe {
                device.cmd_bind_descriptor_sets(
                    self.cb,
                    pipeline.bind_point,
                    pipeline.layout,
                    set_index as u32,
                    &[descriptor_set],
                    &[],
                );
            }
        }
        self.dirty_sets = 0;
    }
}

impl CommandListBackend for VkCommandList {
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn push_marker(&mut self, name: &str) {
        // Markers are recorded only when validation/debug utils are active.
        if self.shared.debug_messenger.is_some() {
            let name = std::ffi::CString::new(name).unwrap_or_default();
            let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
            let loader =
                ash::ext::debug_utils::Device::new(&self.shared.instance, &self.shared.device);
            unsafe { loader.cmd_begin_debug_utils_label(self.cb, &label) };
            self.debug_depth += 1;
        }
    }

    fn pop_marker(&mut self) {
        if self.shared.debug_messenger.is_some() && self.debug_depth > 0 {
            let loader =
                ash::ext::debug_utils::Device::new(&self.shared.instance, &self.shared.device);
            unsafe { loader.cmd_end_debug_utils_label(self.cb) };
            self.debug_depth -= 1;
        }
    }

    fn begin_rendering(&mut self, setup: &RenderingSetup) -> GalResult<()> {
        let device = &self.shared.device;
        let mut tables = self.shared.tables.lock();

        let mut key = RenderPassKey {
            colors: smallvec::SmallVec::new(),
            depth: None,
        };
        let mut views = smallvec::SmallVec::<[vk::ImageView; 9]>::new();
        let mut clear_values = Vec::new();
        let mut extent = (setup.render_area.2, setup.render_area.3);

        for attachment in &setup.color_attachments {
            let index = attachment.texture.id().index();
            let Some(texture) = tables.textures.get_mut(index) else {
                return Err(crate::gal::error::GalError::InvalidHandle);
            };
            let desc = texture.desc;
            if extent.0 == 0 {
                extent = (desc.width, desc.height);
            }
            Self::ensure_attachment_transition(
                device,
                self.cb,
                texture,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                attachment.load_op == crate::gal::descriptors::LoadOp::Load,
            );
            key.colors.push((
                conv::format(desc.format),
                conv::sample_count(desc.samples),
                conv::load_op(attachment.load_op),
                conv::store_op(attachment.store_op),
            ));
            views.push(Self::attachment_view_for(&self.shared, device, index, texture));
            clear_values.push(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: attachment.clear_color,
                },
            });
        }

        if let Some(depth) = &setup.depth_attachment {
            let index = depth.texture.id().index();
            let Some(texture) = tables.textures.get_mut(index) else {
                return Err(crate::gal::error::GalError::InvalidHandle);
            };
            let desc = texture.desc;
            if extent.0 == 0 {
                extent = (desc.width, desc.height);
            }
            Self::ensure_attachment_transition(
                device,
                self.cb,
                texture,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                depth.load_op == crate::gal::descriptors::LoadOp::Load,
            );
            key.depth = Some((
                conv::format(desc.format),
                conv::sample_count(desc.samples),
                conv::load_op(depth.load_op),
                conv::store_op(depth.store_op),
            ));
            views.push(Self::attachment_view_for(&self.shared, device, index, texture));
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: depth.clear_depth,
                    stencil: u32::from(depth.clear_stencil),
                },
            });
        }
        drop(tables);

        let render_pass = self.shared.render_passes.render_pass(device, &key);
        let framebuffer = self.shared.render_passes.framebuffer(
            device,
            &FramebufferKey {
                render_pass,
                views,
                extent,
                layers: 1,
            },
        );

        let begin = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D {
                    x: setup.render_area.0 as i32,
                    y: setup.render_area.1 as i32,
                },
                extent: vk::Extent2D {
                    width: extent.0,
                    height: extent.1,
                },
            })
            .clear_values(&clear_values);
        unsafe {
            device.cmd_begin_render_pass(self.cb, &begin, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(
                self.cb,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.0 as f32,
                    height: extent.1 as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            device.cmd_set_scissor(
                self.cb,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: vk::Extent2D {
                        width: extent.0,
                        height: extent.1,
                    },
                }],
            );
        }
        self.in_render_pass = true;
        self.dirty_sets = u32::MAX;
        Ok(())
    }

    fn end_rendering(&mut self) {
        if !self.in_render_pass {
            return;
        }
        unsafe { self.shared.device.cmd_end_render_pass(self.cb) };
        self.in_render_pass = false;

        // Targets go back to shader-readable so later passes can sample them.
        self.transition_targets_to_readable();
    }

    fn set_graphics_pipeline(&mut self, pipeline: GenIdx) {
        self.bind_pipeline(pipeline);
    }

    fn set_compute_pipeline(&mut self, pipeline: GenIdx) {
        self.bind_pipeline(pipeline);
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) {
        unsafe {
            self.shared.device.cmd_set_viewport(
                self.cb,
                0,
                &[vk::Viewport {
                    x,
                    y,
                    width,
                    height,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
        }
    }

    fn set_scissor(&mut self, x: u32, y: u32, width: u32, height: u32) {
        unsafe {
            self.shared.device.cmd_set_scissor(
                self.cb,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D {
                        x: x as i32,
                        y: y as i32,
                    },
                    extent: vk::Extent2D { width, height },
                }],
            );
        }
    }

    fn bind_vertex_buffer(&mut self, slot: u32, buffer: GenIdx, byte_offset: u32) {
        let tables = self.shared.tables.lock();
        if let Some(vk_buffer) = tables.buffers.get(buffer.index()) {
            unsafe {
                self.shared.device.cmd_bind_vertex_buffers(
                    self.cb,
                    slot,
                    &[vk_buffer.buffer],
                    &[u64::from(byte_offset)],
                );
            }
        }
    }

    fn bind_index_buffer(&mut self, buffer: GenIdx, format: IndexFormat, byte_offset: u32) {
        let tables = self.shared.tables.lock();
        if let Some(vk_buffer) = tables.buffers.get(buffer.index()) {
            unsafe {
                self.shared.device.cmd_bind_index_buffer(
                    self.cb,
                    vk_buffer.buffer,
                    u64::from(byte_offset),
                    conv::index_type(format),
                );
            }
        }
    }

    fn bind_resource(&mut self, set: u8, binding: u8, view: ResolvedBinding) {
        if self.bindings.insert((set, binding), view) != Some(view) {
            self.dirty_sets |= 1 << set;
        }
    }

    fn update_buffer(&mut self, buffer: GenIdx, byte_offset: u32, data: &[u8], mode: UpdateMode) {
        let tables = self.shared.tables.lock();
        let Some(vk_buffer) = tables.buffers.get(buffer.index()) else {
            return;
        };
        if let Some(ptr) = vk_buffer.mapped_ptr() {
            // Host-visible: Discard and NoOverwrite are both direct writes;
            // the ring-buffer protocol upstream guarantees no GPU overlap.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    data.as_ptr(),
                    ptr.add(byte_offset as usize),
                    data.len(),
                );
            }
        } else if mode == UpdateMode::CopyToTempStorage || !self.in_render_pass {
            let dst = vk_buffer.buffer;
            drop(tables);
            if let Ok((staging, allocation)) = self.shared.make_staging(data.len()) {
                if let Some(ptr) = allocation.mapped_ptr() {
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            data.as_ptr(),
                            ptr.as_ptr().cast(),
                            data.len(),
                        );
                    }
                }
                unsafe {
                    self.shared.device.cmd_copy_buffer(
                        self.cb,
                        staging,
                        dst,
                        &[vk::BufferCopy::default()
                            .dst_offset(u64::from(byte_offset))
                            .size(data.len() as u64)],
                    );
                }
                let mut frames = self.shared.frames.lock();
                let current = frames.current;
                frames.slots[current].retired_staging.push((staging, allocation));
            }
        } else {
            log::warn!("update_buffer on device-local buffer inside a render pass; dropped");
        }
    }

    fn copy_texture(
        &mut self,
        src: GenIdx,
        src_sub: TextureSubresource,
        dst: GenIdx,
        dst_sub: TextureSubresource,
    ) {
        self.shared
            .image_copy
            .copy(&self.shared, self.cb, src, src_sub, dst, dst_sub);
    }

    fn copy_buffer(&mut self, src: GenIdx, src_offset: u32, dst: GenIdx, dst_offset: u32, size: u32) {
        let tables = self.shared.tables.lock();
        if let (Some(src), Some(dst)) = (
            tables.buffers.get(src.index()),
            tables.buffers.get(dst.index()),
        ) {
            unsafe {
                self.shared.device.cmd_copy_buffer(
                    self.cb,
                    src.buffer,
                    dst.buffer,
                    &[vk::BufferCopy::default()
                        .src_offset(u64::from(src_offset))
                        .dst_offset(u64::from(dst_offset))
                        .size(u64::from(size))],
                );
            }
        }
    }

    fn resolve_texture(&mut self, src: GenIdx, dst: GenIdx) {
        let tables = self.shared.tables.lock();
        if let (Some(src_tex), Some(dst_tex)) = (
            tables.textures.get(src.index()),
            tables.textures.get(dst.index()),
        ) {
            let extent = vk::Extent3D {
                width: src_tex.desc.width,
                height: src_tex.desc.height,
                depth: 1,
            };
            let region = vk::ImageResolve::default()
                .src_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .layer_count(1),
                )
                .dst_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .layer_count(1),
                )
                .extent(extent);
            unsafe {
                self.shared.device.cmd_resolve_image(
                    self.cb,
                    src_tex.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_tex.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
        }
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.flush_bindings();
        unsafe {
            self.shared.device.cmd_draw(
                self.cb,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        self.flush_bindings();
        unsafe {
            self.shared.device.cmd_draw_indexed(
                self.cb,
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            );
        }
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        self.flush_bindings();
        unsafe {
            self.shared
                .device
                .cmd_dispatch(self.cb, groups_x, groups_y, groups_z);
        }
    }

    fn insert_timestamp(&mut self, query: GenIdx, stage: PipelineStage) {
        let vk_stage = match stage {
            PipelineStage::TopOfPipe => vk::PipelineStageFlags::TOP_OF_PIPE,
            PipelineStage::BottomOfPipe => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        };
        self.shared
            .queries
            .insert_timestamp(&self.shared.device, self.cb, query.index(), vk_stage);
    }
}

impl VkCommandList {
    fn bind_pipeline(&mut self, pipeline: GenIdx) {
        let tables = self.shared.tables.lock();
        if let Some(vk_pipeline) = tables.pipelines.get(pipeline.index()) {
            unsafe {
                self.shared.device.cmd_bind_pipeline(
                    self.cb,
                    vk_pipeline.bind_point,
                    vk_pipeline.pipeline,
                );
            }
            self.pipeline = Some(vk_pipeline.clone());
            self.dirty_sets = u32::MAX;
        }
    }

    fn ensure_attachment_transition(
        device: &ash::Device,
        cb: vk::CommandBuffer,
        texture: &mut super::resources::VkTexture,
        target_layout: vk::ImageLayout,
        preserve_contents: bool,
    ) {
        let from = if preserve_contents {
            texture.current_layout
        } else {
            // Contents are cleared or undefined; UNDEFINED lets the driver
            // discard.
            vk::ImageLayout::UNDEFINED
        };
        VkShared::transition_image(
            device,
            cb,
            texture.image,
            conv::aspect_mask(texture.desc.format),
            from,
            target_layout,
        );
        texture.current_layout = target_layout;
    }

    fn attachment_view_for(
        shared: &VkShared,
        device: &ash::Device,
        index: u32,
        texture: &mut super::resources::VkTexture,
    ) -> vk::ImageView {
        if let Some(view) = shared.image_copy.cached_attachment_view(index) {
            return view;
        }
        let view = VkShared::attachment_view(device, texture, texture.desc.format);
        shared.image_copy.cache_attachment_view(index, view);
        view
    }

    /// After a render pass ends its targets move back to shader-readable so
    /// downstream passes can sample them.
    fn transition_targets_to_readable(&mut self) {
        let mut tables = self.shared.tables.lock();
        for texture in tables.textures.iter_mut() {
            let readable = if texture.desc.format.has_depth() {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            } else {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            };
            if texture.current_layout == vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                || texture.current_layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            {
                VkShared::transition_image(
                    &self.shared.device,
                    self.cb,
                    texture.image,
                    conv::aspect_mask(texture.desc.format),
                    texture.current_layout,
                    readable,
                );
                texture.current_layout = readable;
            }
        }
    }
}
