//! Image Copy Helper
//!
//! Copies between images the backend cannot `vkCmdCopyImage`/blit directly
//! (depth sources into color targets, format conversions) go through a
//! draw-based path: a fullscreen triangle samples the source subresource
//! into the target through a dedicated pipeline. Image views and pipelines
//! are cached per image/format pair and invalidated when an image is
//! destroyed; combinations with no path (e.g. a depth-format destination
//! with mismatched formats) report an explicit error instead of recording
//! anything.

use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::core::handle::GenIdx;
use crate::gal::descriptors::TextureSubresource;

use super::conv;
use super::device::{VkShared, VkTables};
use super::renderpass_cache::{FramebufferKey, RenderPassKey};

/// `(texture index, mip, layer)` — one cached view per sampled or rendered
/// subresource.
type SubresourceKey = (u32, u32, u32);

#[derive(Default)]
struct Caches {
    /// Full-resource render-target views, shared with attachment binding.
    attachment_views: FxHashMap<u32, vk::ImageView>,
    /// Source views sampled by the draw path.
    sample_views: FxHashMap<SubresourceKey, vk::ImageView>,
    /// Destination views rendered to by the draw path.
    target_views: FxHashMap<SubresourceKey, vk::ImageView>,
    /// Copy pipelines keyed by `(source format, destination format)`.
    pipelines: FxHashMap<(vk::Format, vk::Format), vk::Pipeline>,
    /// Compiled fullscreen-copy shader stages.
    modules: Option<(vk::ShaderModule, vk::ShaderModule)>,
}

/// Layout objects shared by every copy pipeline.
struct FixedObjects {
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    sampler: vk::Sampler,
}

pub struct ImageCopyVulkan {
    caches: Mutex<Caches>,
    fixed: Mutex<Option<FixedObjects>>,
    /// SPIR-V for the draw-based copy, installed by the host at startup.
    copy_shader: Mutex<Option<(Vec<u8>, Vec<u8>)>>,
    warned_unsupported: AtomicBool,
}

enum Route {
    Direct,
    Blit,
    Draw,
}

impl ImageCopyVulkan {
    #[must_use]
    pub fn new() -> Self {
        Self {
            caches: Mutex::new(Caches::default()),
            fixed: Mutex::new(None),
            copy_shader: Mutex::new(None),
            warned_unsupported: AtomicBool::new(false),
        }
    }

    /// Installs the fullscreen-copy shader (vertex, fragment) bytecode. The
    /// vertex stage emits a fullscreen triangle from the vertex index; the
    /// fragment stage samples binding 0 of set 0.
    pub fn set_copy_shader(&self, vertex: Vec<u8>, fragment: Vec<u8>) {
        *self.copy_shader.lock() = Some((vertex, fragment));
    }

    pub fn cached_attachment_view(&self, texture_index: u32) -> Option<vk::ImageView> {
        self.caches.lock().attachment_views.get(&texture_index).copied()
    }

    pub fn cache_attachment_view(&self, texture_index: u32, view: vk::ImageView) {
        self.caches.lock().attachment_views.insert(texture_index, view);
    }

    /// Records a copy between two textures, choosing direct copy, blit, or
    /// the draw-based path by format compatibility. Combinations with no
    /// path leave both images untouched and log one error.
    pub fn copy(
        &self,
        shared: &VkShared,
        cb: vk::CommandBuffer,
        src: GenIdx,
        src_sub: TextureSubresource,
        dst: GenIdx,
        dst_sub: TextureSubresource,
    ) {
        let mut tables = shared.tables.lock();
        let Some(src_tex) = tables.textures.get(src.index()) else {
            return;
        };
        let Some(dst_tex) = tables.textures.get(dst.index()) else {
            return;
        };
        let src_desc = src_tex.desc;
        let dst_desc = dst_tex.desc;

        let same_format = src_desc.format == dst_desc.format;
        let same_size = src_desc.width == dst_desc.width && src_desc.height == dst_desc.height;

        let route = if same_format && same_size {
            Route::Direct
        } else if !src_desc.format.has_depth() && !dst_desc.format.has_depth() {
            Route::Blit
        } else if !dst_desc.format.has_depth() && self.copy_shader.lock().is_some() {
            Route::Draw
        } else {
            if !self.warned_unsupported.swap(true, Ordering::Relaxed) {
                log::error!(
                    "no copy path for {:?} -> {:?} (draw-based copies need a color \
                     destination and an installed copy shader); copy dropped",
                    src_desc.format,
                    dst_desc.format
                );
            }
            return;
        };

        match route {
            Route::Direct => {
                self.record_transfer_copy(shared, &mut tables, cb, src, src_sub, dst, dst_sub, false);
            }
            Route::Blit => {
                self.record_transfer_copy(shared, &mut tables, cb, src, src_sub, dst, dst_sub, true);
            }
            Route::Draw => {
                self.record_draw_copy(shared, &mut tables, cb, src, src_sub, dst, dst_sub);
            }
        }
    }

    // ── Transfer path ──────────────────────────────────────────────────────

    fn record_transfer_copy(
        &self,
        shared: &VkShared,
        tables: &mut VkTables,
        cb: vk::CommandBuffer,
        src: GenIdx,
        src_sub: TextureSubresource,
        dst: GenIdx,
        dst_sub: TextureSubresource,
        blit: bool,
    ) {
        let (src_image, src_desc, src_layout) = {
            let t = tables.textures.get(src.index()).unwrap();
            (t.image, t.desc, t.current_layout)
        };
        let (dst_image, dst_desc, dst_layout) = {
            let t = tables.textures.get(dst.index()).unwrap();
            (t.image, t.desc, t.current_layout)
        };
        let src_aspect = conv::aspect_mask(src_desc.format);
        let dst_aspect = conv::aspect_mask(dst_desc.format);

        VkShared::transition_image(
            &shared.device,
            cb,
            src_image,
            src_aspect,
            src_layout,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        VkShared::transition_image(
            &shared.device,
            cb,
            dst_image,
            dst_aspect,
            dst_layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        if blit {
            let region = vk::ImageBlit::default()
                .src_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(src_aspect)
                        .mip_level(src_sub.mip_level)
                        .base_array_layer(src_sub.array_layer)
                        .layer_count(1),
                )
                .dst_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(dst_aspect)
                        .mip_level(dst_sub.mip_level)
                        .base_array_layer(dst_sub.array_layer)
                        .layer_count(1),
                )
                .src_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: src_desc.width as i32,
                        y: src_desc.height as i32,
                        z: 1,
                    },
                ])
                .dst_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: dst_desc.width as i32,
                        y: dst_desc.height as i32,
                        z: 1,
                    },
                ]);
            unsafe {
                shared.device.cmd_blit_image(
                    cb,
                    src_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                    vk::Filter::LINEAR,
                );
            }
        } else {
            let region = vk::ImageCopy::default()
                .src_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(src_aspect)
                        .mip_level(src_sub.mip_level)
                        .base_array_layer(src_sub.array_layer)
                        .layer_count(1),
                )
                .dst_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(dst_aspect)
                        .mip_level(dst_sub.mip_level)
                        .base_array_layer(dst_sub.array_layer)
                        .layer_count(1),
                )
                .extent(vk::Extent3D {
                    width: (src_desc.width >> src_sub.mip_level).max(1),
                    height: (src_desc.height >> src_sub.mip_level).max(1),
                    depth: 1,
                });
            unsafe {
                shared.device.cmd_copy_image(
                    cb,
                    src_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
        }

        let src_readable = readable_layout(src_desc.format);
        let dst_readable = readable_layout(dst_desc.format);
        VkShared::transition_image(
            &shared.device,
            cb,
            src_image,
            src_aspect,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            src_readable,
        );
        VkShared::transition_image(
            &shared.device,
            cb,
            dst_image,
            dst_aspect,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            dst_readable,
        );
        if let Some(t) = tables.textures.get_mut(src.index()) {
            t.current_layout = src_readable;
        }
        if let Some(t) = tables.textures.get_mut(dst.index()) {
            t.current_layout = dst_readable;
        }
    }

    // ── Draw path ──────────────────────────────────────────────────────────

    /// Fullscreen-triangle copy: the source subresource is sampled through a
    /// combined-image-sampler descriptor into a color render pass over the
    /// destination subresource.
    fn record_draw_copy(
        &self,
        shared: &VkShared,
        tables: &mut VkTables,
        cb: vk::CommandBuffer,
        src: GenIdx,
        src_sub: TextureSubresource,
        dst: GenIdx,
        dst_sub: TextureSubresource,
    ) {
        let device = &shared.device;
        let (src_image, src_desc, src_layout) = {
            let t = tables.textures.get(src.index()).unwrap();
            (t.image, t.desc, t.current_layout)
        };
        let (dst_image, dst_desc) = {
            let t = tables.textures.get(dst.index()).unwrap();
            (t.image, t.desc)
        };
        let src_format = conv::format(src_desc.format);
        let dst_format = conv::format(dst_desc.format);
        let src_readable = readable_layout(src_desc.format);

        // Everything fallible happens before the first barrier, so a setup
        // failure leaves both images (and the layout tracker) untouched.
        let Some(fixed) = self.ensure_fixed(device) else {
            return;
        };

        // Subresource views, cached per image.
        let (src_view, dst_view) = {
            let mut caches = self.caches.lock();
            let src_view = *caches
                .sample_views
                .entry((src.index(), src_sub.mip_level, src_sub.array_layer))
                .or_insert_with(|| {
                    make_subresource_view(
                        device,
                        src_image,
                        src_format,
                        sample_aspect(src_desc.format),
                        src_sub,
                    )
                });
            let dst_view = *caches
                .target_views
                .entry((dst.index(), dst_sub.mip_level, dst_sub.array_layer))
                .or_insert_with(|| {
                    make_subresource_view(
                        device,
                        dst_image,
                        dst_format,
                        vk::ImageAspectFlags::COLOR,
                        dst_sub,
                    )
                });
            (src_view, dst_view)
        };

        let render_pass = shared.render_passes.render_pass(
            device,
            &RenderPassKey {
                colors: smallvec::smallvec![(
                    dst_format,
                    vk::SampleCountFlags::TYPE_1,
                    vk::AttachmentLoadOp::DONT_CARE,
                    vk::AttachmentStoreOp::STORE,
                )],
                depth: None,
            },
        );

        let extent = (
            (dst_desc.width >> dst_sub.mip_level).max(1),
            (dst_desc.height >> dst_sub.mip_level).max(1),
        );
        let framebuffer = shared.render_passes.framebuffer(
            device,
            &FramebufferKey {
                render_pass,
                views: smallvec::smallvec![dst_view],
                extent,
                layers: 1,
            },
        );

        let Some(pipeline) = self.ensure_pipeline(device, &fixed, render_pass, src_format, dst_format)
        else {
            return;
        };

        // Setup complete; the render pass itself starts from UNDEFINED
        // (load op DONT_CARE), so only the source needs a barrier.
        VkShared::transition_image(
            device,
            cb,
            src_image,
            conv::aspect_mask(src_desc.format),
            src_layout,
            src_readable,
        );

        // One transient descriptor set from the current frame slot.
        let descriptor_set = {
            let mut frames = shared.frames.lock();
            let current = frames.current;
            frames.slots[current]
                .descriptors
                .allocate(device, fixed.set_layout)
        };
        let image_info = [vk::DescriptorImageInfo::default()
            .sampler(fixed.sampler)
            .image_view(src_view)
            .image_layout(src_readable)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(descriptor_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);
        unsafe { device.update_descriptor_sets(&[write], &[]) };

        let begin = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D {
                    width: extent.0,
                    height: extent.1,
                },
            });
        unsafe {
            device.cmd_begin_render_pass(cb, &begin, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(
                cb,
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
                cb,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: vk::Extent2D {
                        width: extent.0,
                        height: extent.1,
                    },
                }],
            );
            device.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline);
            device.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                fixed.pipeline_layout,
                0,
                &[descriptor_set],
                &[],
            );
            device.cmd_draw(cb, 3, 1, 0, 0);
            device.cmd_end_render_pass(cb);
        }

        // The render pass left the destination in COLOR_ATTACHMENT_OPTIMAL.
        let dst_readable = readable_layout(dst_desc.format);
        VkShared::transition_image(
            device,
            cb,
            dst_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            dst_readable,
        );
        if let Some(t) = tables.textures.get_mut(src.index()) {
            t.current_layout = src_readable;
        }
        if let Some(t) = tables.textures.get_mut(dst.index()) {
            t.current_layout = dst_readable;
        }
    }

    /// Set layout, pipeline layout, and sampler shared by all copy
    /// pipelines; created on first use.
    fn ensure_fixed(&self, device: &ash::Device) -> Option<FixedObjects> {
        let mut fixed = self.fixed.lock();
        if let Some(objects) = fixed.as_ref() {
            return Some(FixedObjects {
                set_layout: objects.set_layout,
                pipeline_layout: objects.pipeline_layout,
                sampler: objects.sampler,
            });
        }

        let sampler_info = vk::SamplerCreateInfo::default()
            .min_filter(vk::Filter::NEAREST)
            .mag_filter(vk::Filter::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE);
        let sampler = unsafe { device.create_sampler(&sampler_info, None).ok()? };

        let samplers = [sampler];
        let binding = vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .immutable_samplers(&samplers);
        let bindings = [binding];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let set_layout = unsafe {
            device
                .create_descriptor_set_layout(&layout_info, None)
                .ok()?
        };

        let set_layouts = [set_layout];
        let pipeline_layout_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let pipeline_layout = unsafe {
            device
                .create_pipeline_layout(&pipeline_layout_info, None)
                .ok()?
        };

        *fixed = Some(FixedObjects {
            set_layout,
            pipeline_layout,
            sampler,
        });
        Some(FixedObjects {
            set_layout,
            pipeline_layout,
            sampler,
        })
    }

    fn ensure_pipeline(
        &self,
        device: &ash::Device,
        fixed: &FixedObjects,
        render_pass: vk::RenderPass,
        src_format: vk::Format,
        dst_format: vk::Format,
    ) -> Option<vk::Pipeline> {
        let mut caches = self.caches.lock();
        if let Some(&pipeline) = caches.pipelines.get(&(src_format, dst_format)) {
            return Some(pipeline);
        }

        let (vertex_module, fragment_module) = match caches.modules {
            Some(modules) => modules,
            None => {
                let shader = self.copy_shader.lock();
                let (vertex_code, fragment_code) = shader.as_ref()?;
                let modules = (
                    make_module(device, vertex_code)?,
                    make_module(device, fragment_code)?,
                );
                caches.modules = Some(modules);
                modules
            }
        };

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(c"main"),
        ];

        // No vertex input: the vertex stage synthesizes the triangle.
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let blend_attachment = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachment);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(fixed.pipeline_layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipeline = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
                .ok()?[0]
        };
        caches.pipelines.insert((src_format, dst_format), pipeline);
        Some(pipeline)
    }

    /// Drops every cache entry referencing `texture_index`. Called through
    /// the device's image-destruction hook.
    pub fn on_image_destroyed(
        &self,
        device: &ash::Device,
        render_passes: &super::renderpass_cache::RenderPassCache,
        texture_index: u32,
    ) {
        let mut caches = self.caches.lock();
        if let Some(view) = caches.attachment_views.remove(&texture_index) {
            render_passes.evict_view(device, view);
            unsafe { device.destroy_image_view(view, None) };
        }
        caches.sample_views.retain(|(index, _, _), view| {
            if *index == texture_index {
                unsafe { device.destroy_image_view(*view, None) };
                false
            } else {
                true
            }
        });
        caches.target_views.retain(|(index, _, _), view| {
            if *index == texture_index {
                render_passes.evict_view(device, *view);
                unsafe { device.destroy_image_view(*view, None) };
                false
            } else {
                true
            }
        });
    }

    pub fn shutdown(&self, device: &ash::Device) {
        let mut caches = self.caches.lock();
        for (_, view) in caches.attachment_views.drain() {
            unsafe { device.destroy_image_view(view, None) };
        }
        for (_, view) in caches.sample_views.drain() {
            unsafe { device.destroy_image_view(view, None) };
        }
        for (_, view) in caches.target_views.drain() {
            unsafe { device.destroy_image_view(view, None) };
        }
        for (_, pipeline) in caches.pipelines.drain() {
            unsafe { device.destroy_pipeline(pipeline, None) };
        }
        if let Some((vertex, fragment)) = caches.modules.take() {
            unsafe {
                device.destroy_shader_module(vertex, None);
                device.destroy_shader_module(fragment, None);
            }
        }
        if let Some(fixed) = self.fixed.lock().take() {
            unsafe {
                device.destroy_pipeline_layout(fixed.pipeline_layout, None);
                device.destroy_descriptor_set_layout(fixed.set_layout, None);
                device.destroy_sampler(fixed.sampler, None);
            }
        }
    }
}

impl Default for ImageCopyVulkan {
    fn default() -> Self {
        Self::new()
    }
}

fn readable_layout(format: crate::gal::format::ResourceFormat) -> vk::ImageLayout {
    if format.has_depth() {
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    }
}

/// Sampling aspect: depth-stencil images sample the depth plane.
fn sample_aspect(format: crate::gal::format::ResourceFormat) -> vk::ImageAspectFlags {
    if format.has_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

fn make_subresource_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    sub: TextureSubresource,
) -> vk::ImageView {
    let info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect)
                .base_mip_level(sub.mip_level)
                .level_count(1)
                .base_array_layer(sub.array_layer)
                .layer_count(1),
        );
    unsafe {
        device
            .create_image_view(&info, None)
            .expect("copy subresource view")
    }
}

fn make_module(device: &ash::Device, bytecode: &[u8]) -> Option<vk::ShaderModule> {
    if bytecode.len() % 4 != 0 || bytecode.is_empty() {
        log::error!("copy shader bytecode is not valid SPIR-V");
        return None;
    }
    let words: Vec<u32> = bytecode
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let info = vk::ShaderModuleCreateInfo::default().code(&words);
    unsafe { device.create_shader_module(&info, None).ok() }
}
