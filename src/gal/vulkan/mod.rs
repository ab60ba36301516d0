//! Vulkan Backend
//!
//! ash-based implementation of the backend traits. Descriptor-set layouts are
//! derived from shader reflection with immutable samplers baked in, render
//! passes and framebuffers are cached by attachment shape, timestamp queries
//! run through retained pools with one-time clock calibration, and a
//! draw-based image-copy helper covers the combinations `vkCmdBlitImage`
//! cannot.

mod command_list;
mod conv;
mod descriptors;
mod device;
mod image_copy;
mod memory;
mod pipelines;
mod query_pool;
mod renderpass_cache;
mod resources;
mod swapchain;

use std::sync::Arc;

use ash::vk;

use crate::core::handle::GenIdx;
use crate::gal::backend::{
    BufferViewDesc, CommandListBackend, GalBackend, ResolvedComputePipeline,
    ResolvedGraphicsPipeline, TextureViewDesc, TimestampResult,
};
use crate::gal::descriptors::{
    BufferCreationDesc, SamplerStateDesc, TextureCreationDesc, TextureInitData,
};
use crate::gal::device::DeviceConfig;
use crate::gal::error::{GalError, GalResult};
use crate::gal::shader::ShaderCreationDesc;
use crate::gal::swapchain::SwapChainCreationDesc;

use command_list::VkCommandList;
use device::VkShared;
use resources::{VkBufferView, VkImageView};

pub struct VulkanBackend {
    shared: Arc<VkShared>,
}

impl VulkanBackend {
    /// Brings up instance, device, allocator, caches, and frame slots.
    pub fn create(config: &DeviceConfig) -> GalResult<Self> {
        let shared = VkShared::create(config)?;
        log::info!("vulkan backend initialized (queue family {})", shared.queue_family);
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Installs the fullscreen-copy shader (vertex, fragment SPIR-V) the
    /// image-copy helper uses for format combinations it cannot blit.
    pub fn install_copy_shader(&self, vertex: Vec<u8>, fragment: Vec<u8>) {
        self.shared.image_copy.set_copy_shader(vertex, fragment);
    }
}

impl GalBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "vulkan"
    }

    // ── Resources ──────────────────────────────────────────────────────────

    fn create_texture(
        &self,
        id: GenIdx,
        desc: &TextureCreationDesc,
        init: Option<&TextureInitData<'_>>,
    ) -> GalResult<()> {
        let texture = self.shared.make_texture(desc, init)?;
        self.shared.tables.lock().textures.set(id.index(), texture);
        Ok(())
    }

    fn destroy_texture(&self, id: GenIdx) {
        let texture = self.shared.tables.lock().textures.take(id.index());
        if let Some(texture) = texture {
            self.shared.image_copy.on_image_destroyed(
                &self.shared.device,
                &self.shared.render_passes,
                id.index(),
            );
            if texture.owned {
                unsafe { self.shared.device.destroy_image(texture.image, None) };
                if let Some(allocation) = texture.allocation {
                    self.shared.memory.free(allocation);
                }
            }
        }
    }

    fn create_buffer(
        &self,
        id: GenIdx,
        desc: &BufferCreationDesc,
        init: Option<&[u8]>,
    ) -> GalResult<()> {
        let buffer = self.shared.make_buffer(desc, init)?;
        self.shared.tables.lock().buffers.set(id.index(), buffer);
        Ok(())
    }

    fn destroy_buffer(&self, id: GenIdx) {
        let buffer = self.shared.tables.lock().buffers.take(id.index());
        if let Some(buffer) = buffer {
            unsafe { self.shared.device.destroy_buffer(buffer.buffer, None) };
            if let Some(allocation) = buffer.allocation {
                self.shared.memory.free(allocation);
            }
        }
    }

    fn create_shader(&self, _id: GenIdx, desc: &ShaderCreationDesc) -> GalResult<()> {
        // Modules are created per pipeline; here only the bytecode is
        // validated so failures surface at load time.
        for stage in [
            crate::gal::shader::ShaderStage::Vertex,
            crate::gal::shader::ShaderStage::Geometry,
            crate::gal::shader::ShaderStage::Fragment,
            crate::gal::shader::ShaderStage::Compute,
        ] {
            if let Some(code) = desc.bytecode(stage) {
                if code.len() % 4 != 0 || code.is_empty() {
                    return Err(GalError::ShaderCompileError {
                        stage: stage.name(),
                        name: "bytecode is not valid SPIR-V",
                    });
                }
            }
        }
        Ok(())
    }

    fn destroy_shader(&self, _id: GenIdx) {}

    fn create_sampler(&self, id: GenIdx, desc: &SamplerStateDesc) -> GalResult<()> {
        let sampler = device::create_vk_sampler(&self.shared.device, desc);
        self.shared.tables.lock().samplers.set(id.index(), sampler);
        Ok(())
    }

    fn destroy_sampler(&self, id: GenIdx) {
        let sampler = self.shared.tables.lock().samplers.take(id.index());
        if let Some(sampler) = sampler {
            unsafe { self.shared.device.destroy_sampler(sampler, None) };
        }
    }

    fn create_texture_view(&self, id: GenIdx, desc: &TextureViewDesc) -> GalResult<()> {
        let mut tables = self.shared.tables.lock();
        let Some(texture) = tables.textures.get(desc.texture.index()) else {
            return Err(GalError::InvalidHandle);
        };
        let info = vk::ImageViewCreateInfo::default()
            .image(texture.image)
            .view_type(conv::image_view_type(texture.desc.texture_type))
            .format(conv::format(texture.desc.format))
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    // Depth/stencil resources sample the depth aspect.
                    .aspect_mask(if texture.desc.format.has_depth() {
                        vk::ImageAspectFlags::DEPTH
                    } else {
                        vk::ImageAspectFlags::COLOR
                    })
                    .base_mip_level(desc.base_mip)
                    .level_count(desc.mip_count)
                    .base_array_layer(desc.base_layer)
                    .layer_count(desc.layer_count),
            );
        let view = unsafe {
            self.shared
                .device
                .create_image_view(&info, None)
                .map_err(|_| GalError::OutOfDeviceMemory)?
        };
        tables.texture_views.set(
            id.index(),
            VkImageView {
                view,
                texture_index: desc.texture.index(),
            },
        );
        Ok(())
    }

    fn destroy_texture_view(&self, id: GenIdx) {
        let view = self.shared.tables.lock().texture_views.take(id.index());
        if let Some(view) = view {
            self.shared
                .render_passes
                .evict_view(&self.shared.device, view.view);
            unsafe { self.shared.device.destroy_image_view(view.view, None) };
        }
    }

    fn create_buffer_view(&self, id: GenIdx, desc: &BufferViewDesc) -> GalResult<()> {
        let mut tables = self.shared.tables.lock();
        if tables.buffers.get(desc.buffer.index()).is_none() {
            return Err(GalError::InvalidHandle);
        }
        tables.buffer_views.set(
            id.index(),
            VkBufferView {
                buffer_index: desc.buffer.index(),
                offset: desc.byte_offset,
                size: desc.byte_size,
            },
        );
        Ok(())
    }

    fn destroy_buffer_view(&self, id: GenIdx) {
        self.shared.tables.lock().buffer_views.take(id.index());
    }

    fn create_texture_uav(&self, id: GenIdx, desc: &TextureViewDesc) -> GalResult<()> {
        let mut tables = self.shared.tables.lock();
        let Some(texture) = tables.textures.get(desc.texture.index()) else {
            return Err(GalError::InvalidHandle);
        };
        let info = vk::ImageViewCreateInfo::default()
            .image(texture.image)
            .view_type(conv::image_view_type(texture.desc.texture_type))
            .format(conv::format(texture.desc.format))
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(desc.base_mip)
                    .level_count(1)
                    .base_array_layer(desc.base_layer)
                    .layer_count(desc.layer_count),
            );
        let view = unsafe {
            self.shared
                .device
                .create_image_view(&info, None)
                .map_err(|_| GalError::OutOfDeviceMemory)?
        };
        tables.texture_uavs.set(
            id.index(),
            VkImageView {
                view,
                texture_index: desc.texture.index(),
            },
        );
        Ok(())
    }

    fn destroy_texture_uav(&self, id: GenIdx) {
        let view = self.shared.tables.lock().texture_uavs.take(id.index());
        if let Some(view) = view {
            unsafe { self.shared.device.destroy_image_view(view.view, None) };
        }
    }

    fn create_buffer_uav(&self, id: GenIdx, desc: &BufferViewDesc) -> GalResult<()> {
        let mut tables = self.shared.tables.lock();
        if tables.buffers.get(desc.buffer.index()).is_none() {
            return Err(GalError::InvalidHandle);
        }
        tables.buffer_uavs.set(
            id.index(),
            VkBufferView {
                buffer_index: desc.buffer.index(),
                offset: desc.byte_offset,
                size: desc.byte_size,
            },
        );
        Ok(())
    }

    fn destroy_buffer_uav(&self, id: GenIdx) {
        self.shared.tables.lock().buffer_uavs.take(id.index());
    }

    fn create_graphics_pipeline(
        &self,
        id: GenIdx,
        resolved: &ResolvedGraphicsPipeline<'_>,
    ) -> GalResult<()> {
        let pipeline = pipelines::create_graphics_pipeline(
            &self.shared.device,
            self.shared.pipeline_cache,
            &self.shared.layouts,
            &self.shared.render_passes,
            resolved,
        )?;
        self.shared
            .tables
            .lock()
            .pipelines
            .set(id.index(), Arc::new(pipeline));
        Ok(())
    }

    fn create_compute_pipeline(
        &self,
        id: GenIdx,
        resolved: &ResolvedComputePipeline<'_>,
    ) -> GalResult<()> {
        let pipeline = pipelines::create_compute_pipeline(
            &self.shared.device,
            self.shared.pipeline_cache,
            &self.shared.layouts,
            resolved,
        )?;
        self.shared
            .tables
            .lock()
            .pipelines
            .set(id.index(), Arc::new(pipeline));
        Ok(())
    }

    fn destroy_pipeline(&self, id: GenIdx) {
        let pipeline = self.shared.tables.lock().pipelines.take(id.index());
        if let Some(pipeline) = pipeline {
            // Layouts are cache-owned; only the pipeline object dies here.
            unsafe { self.shared.device.destroy_pipeline(pipeline.pipeline, None) };
        }
    }

    // ── Swap chains ────────────────────────────────────────────────────────

    fn create_swap_chain(&self, id: GenIdx, desc: &SwapChainCreationDesc) -> GalResult<()> {
        let sc = self.shared.swapchain_support.create_swap_chain(
            &self.shared.entry,
            &self.shared.instance,
            &self.shared.device,
            self.shared.physical_device,
            desc,
        )?;

        let backbuffer_index = desc.backbuffer_texture.id().index();
        if sc.headless {
            // Offscreen backbuffer.
            let texture = self.shared.make_texture(&desc.backbuffer_desc(), None)?;
            self.shared
                .tables
                .lock()
                .textures
                .set(backbuffer_index, texture);
        } else if let Some(&image) = sc.images.first() {
            self.shared.tables.lock().textures.set(
                backbuffer_index,
                resources::VkTexture {
                    image,
                    allocation: None,
                    desc: desc.backbuffer_desc(),
                    current_layout: vk::ImageLayout::UNDEFINED,
                    owned: false,
                },
            );
        }
        self.shared.tables.lock().swap_chains.set(id.index(), sc);
        Ok(())
    }

    fn destroy_swap_chain(&self, id: GenIdx) {
        let sc = self.shared.tables.lock().swap_chains.take(id.index());
        if let Some(sc) = sc {
            self.shared.swapchain_support.destroy(
                &self.shared.device,
                &self.shared.swapchain_support.surface_loader,
                sc,
            );
        }
    }

    fn acquire_next_image(&self, id: GenIdx) -> GalResult<()> {
        let mut tables = self.shared.tables.lock();
        let Some(sc) = tables.swap_chains.get_mut(id.index()) else {
            return Err(GalError::InvalidHandle);
        };
        let backbuffer_index = sc.backbuffer_texture_index;
        if let Some(image) = self.shared.swapchain_support.acquire(sc)? {
            if let Some(texture) = tables.textures.get_mut(backbuffer_index) {
                texture.image = image;
                texture.current_layout = vk::ImageLayout::UNDEFINED;
                texture.owned = false;
            }
            // New image: stale attachment view must go.
            self.shared.image_copy.on_image_destroyed(
                &self.shared.device,
                &self.shared.render_passes,
                backbuffer_index,
            );
            self.shared.frames.lock().acquired.push(id.index());
        }
        Ok(())
    }

    fn present(&self, id: GenIdx) -> GalResult<()> {
        let tables = self.shared.tables.lock();
        let Some(sc) = tables.swap_chains.get(id.index()) else {
            return Err(GalError::InvalidHandle);
        };
        let _guard = self.shared.submit_lock.lock();
        self.shared.swapchain_support.present(self.shared.queue, sc)
    }

    // ── Queries ────────────────────────────────────────────────────────────

    fn create_query(&self, _id: GenIdx) -> GalResult<()> {
        Ok(())
    }

    fn destroy_query(&self, _id: GenIdx) {}

    fn get_timestamp_result(&self, id: GenIdx, force_wait: bool) -> TimestampResult {
        self.shared
            .queries
            .get_result(&self.shared.device, id.index(), force_wait)
    }

    // ── Frame control ──────────────────────────────────────────────────────

    fn begin_frame(&self, frame_index: u64) -> u64 {
        let mut frames = self.shared.frames.lock();
        let slot_count = frames.slots.len() as u64;
        frames.frame_index = frame_index;
        frames.current = ((frame_index.max(1) - 1) % slot_count) as usize;
        let current = frames.current;
        let slot = &mut frames.slots[current];

        unsafe {
            if slot.fence_in_flight {
                let fences = [slot.fence];
                let _ = self.shared.device.wait_for_fences(&fences, true, u64::MAX);
                let _ = self.shared.device.reset_fences(&fences);
                slot.fence_in_flight = false;
            }
            let _ = self
                .shared
                .device
                .reset_command_pool(slot.command_pool, vk::CommandPoolResetFlags::empty());
        }
        let used = std::mem::take(&mut slot.used_buffers);
        slot.free_buffers.extend(used);
        slot.descriptors.reset(&self.shared.device);
        for (buffer, allocation) in slot.retired_staging.drain(..) {
            unsafe { self.shared.device.destroy_buffer(buffer, None) };
            self.shared.memory.free(allocation);
        }
        drop(frames);

        let retired = frame_index.saturating_sub(slot_count);
        self.shared
            .queries
            .begin_frame(&self.shared.device, frame_index, retired);
        retired
    }

    fn end_frame(&self, lists: Vec<Box<dyn CommandListBackend>>) -> GalResult<()> {
        let mut buffers = Vec::with_capacity(lists.len() + 1);
        for mut list in lists {
            if let Some(vk_list) = list.as_any_mut().downcast_mut::<VkCommandList>() {
                vk_list.finish();
                buffers.push(vk_list.cb);
            }
        }

        // Epilogue: transition acquired backbuffers to PRESENT_SRC.
        let acquired: Vec<u32> = {
            let mut frames = self.shared.frames.lock();
            std::mem::take(&mut frames.acquired)
        };
        let mut wait_semaphores = Vec::new();
        let mut signal_semaphores = Vec::new();
        if !acquired.is_empty() {
            let mut epilogue = VkCommandList::open(self.shared.clone());
            {
                let mut tables = self.shared.tables.lock();
                for sc_index in &acquired {
                    let Some(sc) = tables.swap_chains.get(*sc_index) else {
                        continue;
                    };
                    if sc.headless {
                        continue;
                    }
                    wait_semaphores.push(sc.acquire_semaphore);
                    signal_semaphores.push(sc.render_finished_semaphore);
                    let backbuffer = sc.backbuffer_texture_index;
                    if let Some(texture) = tables.textures.get_mut(backbuffer) {
                        VkShared::transition_image(
                            &self.shared.device,
                            epilogue.cb,
                            texture.image,
                            vk::ImageAspectFlags::COLOR,
                            texture.current_layout,
                            vk::ImageLayout::PRESENT_SRC_KHR,
                        );
                        texture.current_layout = vk::ImageLayout::PRESENT_SRC_KHR;
                    }
                }
            }
            epilogue.finish();
            buffers.push(epilogue.cb);
        }

        let fence = {
            let mut frames = self.shared.frames.lock();
            let current = frames.current;
            let slot = &mut frames.slots[current];
            slot.fence_in_flight = true;
            slot.fence
        };

        let wait_stages: Vec<vk::PipelineStageFlags> = wait_semaphores
            .iter()
            .map(|_| vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .collect();
        let submit = vk::SubmitInfo::default()
            .command_buffers(&buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        let _guard = self.shared.submit_lock.lock();
        let result = unsafe {
            self.shared
                .device
                .queue_submit(self.shared.queue, &[submit], fence)
        };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(GalError::DeviceLost),
            Err(e) => {
                log::error!("queue submit failed: {e}");
                Err(GalError::DeviceLost)
            }
        }
    }

    fn open_command_list(&self) -> Box<dyn CommandListBackend> {
        Box::new(VkCommandList::open(self.shared.clone()))
    }

    fn wait_idle(&self) {
        let _guard = self.shared.submit_lock.lock();
        unsafe {
            let _ = self.shared.device.device_wait_idle();
        }
        let mut frames = self.shared.frames.lock();
        for slot in &mut frames.slots {
            slot.fence_in_flight = false;
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.wait_idle();
        pipelines::save_pipeline_cache(&self.shared.device, self.shared.pipeline_cache);

        let device = self.shared.device.clone();
        let mut tables = self.shared.tables.lock();
        unsafe {
            for view in tables.texture_views.drain() {
                device.destroy_image_view(view.view, None);
            }
            for view in tables.texture_uavs.drain() {
                device.destroy_image_view(view.view, None);
            }
            let _ = tables.buffer_views.drain().count();
            let _ = tables.buffer_uavs.drain().count();
            for sampler in tables.samplers.drain() {
                device.destroy_sampler(sampler, None);
            }
            for pipeline in tables.pipelines.drain() {
                device.destroy_pipeline(pipeline.pipeline, None);
            }
            for texture in tables.textures.drain() {
                if texture.owned {
                    device.destroy_image(texture.image, None);
                    if let Some(allocation) = texture.allocation {
                        self.shared.memory.free(allocation);
                    }
                }
            }
            for buffer in tables.buffers.drain() {
                device.destroy_buffer(buffer.buffer, None);
                if let Some(allocation) = buffer.allocation {
                    self.shared.memory.free(allocation);
                }
            }
            for sc in tables.swap_chains.drain() {
                self.shared.swapchain_support.destroy(
                    &device,
                    &self.shared.swapchain_support.surface_loader,
                    sc,
                );
            }
        }
        drop(tables);

        self.shared.image_copy.shutdown(&device);
        self.shared.render_passes.shutdown(&device);
        self.shared.layouts.shutdown(&device);
        self.shared.queries.shutdown(&device);

        let mut frames = self.shared.frames.lock();
        unsafe {
            for slot in &mut frames.slots {
                device.destroy_fence(slot.fence, None);
                device.destroy_command_pool(slot.command_pool, None);
                slot.descriptors.shutdown(&device);
                for (buffer, allocation) in slot.retired_staging.drain(..) {
                    device.destroy_buffer(buffer, None);
                    self.shared.memory.free(allocation);
                }
            }
            device.destroy_command_pool(*self.shared.upload_pool.lock(), None);
            if self.shared.pipeline_cache != vk::PipelineCache::null() {
                device.destroy_pipeline_cache(self.shared.pipeline_cache, None);
            }
        }
        drop(frames);

        self.shared.memory.shutdown();
        unsafe {
            device.destroy_device(None);
            if let Some((loader, messenger)) = &self.shared.debug_messenger {
                loader.destroy_debug_utils_messenger(*messenger, None);
            }
            self.shared.instance.destroy_instance(None);
        }
    }
}
