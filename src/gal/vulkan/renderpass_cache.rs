//! Render Pass & Framebuffer Caches
//!
//! Classic render pass objects, cached by attachment shape + ops, and
//! framebuffers cached by `{renderpass, image views, extent, layers}`.
//! Framebuffer entries referencing a destroyed image are evicted through the
//! image-destruction hook.

use ash::vk;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RenderPassKey {
    /// `(format, samples, load op, store op)` per color attachment.
    pub colors: smallvec::SmallVec<[(vk::Format, vk::SampleCountFlags, vk::AttachmentLoadOp, vk::AttachmentStoreOp); 8]>,
    pub depth: Option<(vk::Format, vk::SampleCountFlags, vk::AttachmentLoadOp, vk::AttachmentStoreOp)>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FramebufferKey {
    pub render_pass: vk::RenderPass,
    pub views: smallvec::SmallVec<[vk::ImageView; 9]>,
    pub extent: (u32, u32),
    pub layers: u32,
}

#[derive(Default)]
pub struct RenderPassCache {
    render_passes: Mutex<FxHashMap<RenderPassKey, vk::RenderPass>>,
    framebuffers: Mutex<FxHashMap<FramebufferKey, vk::Framebuffer>>,
}

impl RenderPassCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches or builds the render pass for `key`.
    pub fn render_pass(&self, device: &ash::Device, key: &RenderPassKey) -> vk::RenderPass {
        if let Some(&pass) = self.render_passes.lock().get(key) {
            return pass;
        }

        let mut attachments = Vec::with_capacity(key.colors.len() + 1);
        let mut color_refs = Vec::with_capacity(key.colors.len());
        for (i, (format, samples, load, store)) in key.colors.iter().enumerate() {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(*format)
                    .samples(sample_flag_bits(*samples))
                    .load_op(*load)
                    .store_op(*store)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(if *load == vk::AttachmentLoadOp::LOAD {
                        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                    } else {
                        vk::ImageLayout::UNDEFINED
                    })
                    .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            );
            color_refs.push(
                vk::AttachmentReference::default()
                    .attachment(i as u32)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            );
        }

        let mut depth_ref = vk::AttachmentReference::default();
        let has_depth = key.depth.is_some();
        if let Some((format, samples, load, store)) = key.depth {
            depth_ref = vk::AttachmentReference::default()
                .attachment(attachments.len() as u32)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(format)
                    .samples(sample_flag_bits(samples))
                    .load_op(load)
                    .store_op(store)
                    .stencil_load_op(load)
                    .stencil_store_op(store)
                    .initial_layout(if load == vk::AttachmentLoadOp::LOAD {
                        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
                    } else {
                        vk::ImageLayout::UNDEFINED
                    })
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            );
        }

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if has_depth {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }

        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            )
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let subpasses = [subpass];
        let dependencies = [dependency];
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let pass = unsafe {
            device
                .create_render_pass(&info, None)
                .expect("render pass creation")
        };
        self.render_passes.lock().insert(key.clone(), pass);
        pass
    }

    /// Fetches or builds the framebuffer for `key`.
    pub fn framebuffer(&self, device: &ash::Device, key: &FramebufferKey) -> vk::Framebuffer {
        if let Some(&fb) = self.framebuffers.lock().get(key) {
            return fb;
        }
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(key.render_pass)
            .attachments(&key.views)
            .width(key.extent.0)
            .height(key.extent.1)
            .layers(key.layers);
        let fb = unsafe {
            device
                .create_framebuffer(&info, None)
                .expect("framebuffer creation")
        };
        self.framebuffers.lock().insert(key.clone(), fb);
        fb
    }

    /// Evicts framebuffers that reference `view`. Called before an image view
    /// is destroyed.
    pub fn evict_view(&self, device: &ash::Device, view: vk::ImageView) {
        let mut framebuffers = self.framebuffers.lock();
        framebuffers.retain(|key, fb| {
            if key.views.contains(&view) {
                unsafe { device.destroy_framebuffer(*fb, None) };
                false
            } else {
                true
            }
        });
    }

    pub fn shutdown(&self, device: &ash::Device) {
        for (_, fb) in self.framebuffers.lock().drain() {
            unsafe { device.destroy_framebuffer(fb, None) };
        }
        for (_, pass) in self.render_passes.lock().drain() {
            unsafe { device.destroy_render_pass(pass, None) };
        }
    }
}

fn sample_flag_bits(flags: vk::SampleCountFlags) -> vk::SampleCountFlags {
    if flags.is_empty() {
        vk::SampleCountFlags::TYPE_1
    } else {
        flags
    }
}
